use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use capsql_core::backend::SqlBackend;
use capsql_core::writer::{DatabaseWriter, WriterOptions};
use capsql_core::TableColumnFilter;
use capsql_ingestion::pdml::PacketTransformer;
use capsql_ingestion::{Dissector, FixupEngine};
use capsql_schema::loader::{load_all, CatalogStreams};
use capsql_schema::SchemaRegistry;
use capsql_sink_mysql::MySqlBackend;
use capsql_sink_postgres::PostgresBackend;
use capsql_types::log::{info, warn};
use capsql_types::models::config::{Config, DatabaseConfig};

use crate::errors::OrchestrationError;

/// End-to-end run: load the dissector schema, then per capture file drive
/// the dissector and stream its packet XML into the database writer.
pub struct Loader {
    config: Config,
}

impl Loader {
    pub fn new(config: Config) -> Loader {
        Loader { config }
    }

    pub fn run(&self) -> Result<(), OrchestrationError> {
        let dissector = Dissector::new(
            &self.config.dissector.path,
            self.config.dissector.args.clone(),
        );
        dissector.verify()?;

        let captures = self.discover_captures()?;
        info!("Found {} capture file(s)", captures.len());

        let registry = self.load_schema(&dissector)?;
        let fixups = self.load_fixups()?;
        let filter = self.load_filter()?;

        let backend = self.connect()?;
        let writer = DatabaseWriter::start(
            backend,
            filter,
            WriterOptions {
                queue_capacity: self.config.writer.queue_capacity,
                foreign_keys: self.config.writer.foreign_keys,
                drop_byte_columns: self.config.writer.drop_byte_columns,
            },
        )?;

        let transformer = PacketTransformer::new(&registry, &fixups);
        for capture in &captures {
            let sidecar = dissector.dissect_to_sidecar(capture)?;
            let stream = File::open(&sidecar)
                .map_err(|e| capsql_ingestion::errors::IngestionError::StreamOpen(sidecar.clone(), e))?;
            let capture_path = canonical_path(capture);
            let packets = transformer.transform_stream(
                BufReader::new(stream),
                &capture_path,
                |row| writer.write(row).map_err(Into::into),
            )?;
            info!("Loaded {packets} packet(s) from {capture_path}");
        }

        writer.flush()?;
        Ok(())
    }

    fn discover_captures(&self) -> Result<Vec<PathBuf>, OrchestrationError> {
        let directory = Path::new(&self.config.input.directory);
        if !directory.is_dir() {
            return Err(OrchestrationError::UnreadableInputDirectory(
                directory.to_path_buf(),
            ));
        }

        let mut captures = Vec::new();
        for pattern in &self.config.input.patterns {
            let full = directory.join(pattern);
            let Some(full) = full.to_str() else {
                warn!("Skipping non-UTF-8 glob pattern");
                continue;
            };
            match glob::glob(full) {
                Ok(paths) => {
                    for path in paths.flatten() {
                        if path.is_file() {
                            captures.push(path);
                        }
                    }
                }
                Err(e) => warn!("Skipping bad glob pattern {pattern:?}: {e}"),
            }
        }
        captures.sort();
        captures.dedup();
        if captures.is_empty() {
            return Err(OrchestrationError::NoCaptureFiles(directory.to_path_buf()));
        }
        Ok(captures)
    }

    fn load_schema(&self, dissector: &Dissector) -> Result<SchemaRegistry, OrchestrationError> {
        info!("Loading dissector schema catalogs");
        let protocols = dissector.load_catalog("protocols")?;
        let fields = dissector.load_catalog("fields")?;
        let values = dissector.load_catalog("values")?;
        let decodes = dissector.load_catalog("decodes")?;
        let registry = load_all(CatalogStreams {
            protocols: Cursor::new(protocols),
            fields: Cursor::new(fields),
            values: Cursor::new(values),
            decodes: Cursor::new(decodes),
        })?;
        info!(
            "Schema loaded: {} protocols, {} fields",
            registry.protocols().count(),
            registry.fields().count()
        );
        Ok(registry)
    }

    fn load_fixups(&self) -> Result<FixupEngine, OrchestrationError> {
        match &self.config.rules.fixups_path {
            None => Ok(FixupEngine::builtin()?),
            Some(path) => {
                let xml = std::fs::read_to_string(path)
                    .map_err(|e| OrchestrationError::RuleFileRead(PathBuf::from(path), e))?;
                Ok(FixupEngine::with_external(&xml)?)
            }
        }
    }

    fn load_filter(&self) -> Result<TableColumnFilter, OrchestrationError> {
        match &self.config.rules.filter_path {
            None => Ok(TableColumnFilter::empty()),
            Some(path) => {
                let xml = std::fs::read_to_string(path)
                    .map_err(|e| OrchestrationError::RuleFileRead(PathBuf::from(path), e))?;
                Ok(TableColumnFilter::from_xml(&xml)?)
            }
        }
    }

    fn connect(&self) -> Result<Box<dyn SqlBackend>, OrchestrationError> {
        match &self.config.database {
            DatabaseConfig::MySql { url } => MySqlBackend::connect(url)
                .map(|backend| Box::new(backend) as Box<dyn SqlBackend>)
                .map_err(|e| OrchestrationError::Connect(Box::new(e))),
            DatabaseConfig::Postgres { url } => PostgresBackend::connect(url)
                .map(|backend| Box::new(backend) as Box<dyn SqlBackend>)
                .map_err(|e| OrchestrationError::Connect(Box::new(e))),
        }
    }
}

/// Absolute path recorded in the sourcefile table; falls back to the
/// given path when the file system cannot resolve it.
fn canonical_path(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

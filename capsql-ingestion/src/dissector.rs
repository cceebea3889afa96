use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use capsql_types::log::{debug, info};

use crate::errors::IngestionError;

/// Interval at which a running dissector child is polled for exit.
const CHILD_POLL: Duration = Duration::from_millis(500);

/// Extension of the per-input side-car file receiving the packet XML.
const SIDECAR_EXTENSION: &str = "data";

/// Handle to the external dissector binary. The dissector is a black box:
/// it emits the four schema catalogs and, per capture file, a packet XML
/// stream.
#[derive(Clone, Debug)]
pub struct Dissector {
    path: PathBuf,
    extra_args: Vec<String>,
}

impl Dissector {
    pub fn new(path: impl Into<PathBuf>, extra_args: Vec<String>) -> Dissector {
        Dissector {
            path: path.into(),
            extra_args,
        }
    }

    /// Confirms the binary exists before any work starts; a missing
    /// dissector is one of the few fatal conditions.
    pub fn verify(&self) -> Result<(), IngestionError> {
        if self.path.is_file() {
            Ok(())
        } else {
            Err(IngestionError::DissectorNotFound(self.path.clone()))
        }
    }

    /// Runs a `-G <report>` invocation and captures the catalog text.
    pub fn load_catalog(&self, report: &str) -> Result<Vec<u8>, IngestionError> {
        debug!("Loading dissector catalog: {report}");
        let output = Command::new(&self.path)
            .args(&self.extra_args)
            .arg("-G")
            .arg(report)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(IngestionError::DissectorLaunch)?;
        Ok(output.stdout)
    }

    /// Dissects one capture into its side-car XML file and returns the
    /// side-car path. The child is polled until exit; its exit code is
    /// ignored, a truncated side-car is tolerated downstream.
    pub fn dissect_to_sidecar(&self, capture: &Path) -> Result<PathBuf, IngestionError> {
        let sidecar = sidecar_path(capture);
        let out = File::create(&sidecar)
            .map_err(|e| IngestionError::SidecarCreate(sidecar.clone(), e))?;

        info!("Dissecting {} -> {}", capture.display(), sidecar.display());
        let mut child = Command::new(&self.path)
            .args(&self.extra_args)
            .arg("-T")
            .arg("pdml")
            .arg("-r")
            .arg(capture)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::null())
            .spawn()
            .map_err(IngestionError::DissectorLaunch)?;

        loop {
            match child.try_wait()? {
                Some(status) => {
                    debug!("Dissector exited with {status} for {}", capture.display());
                    break;
                }
                None => std::thread::sleep(CHILD_POLL),
            }
        }
        Ok(sidecar)
    }
}

fn sidecar_path(capture: &Path) -> PathBuf {
    let mut name = capture.as_os_str().to_os_string();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

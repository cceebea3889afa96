use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;

// Packages the built-in fixup rules: a four-byte magic header followed by
// the raw-deflate compressed rule XML.
const RULE_MAGIC: [u8; 4] = [0x53, 0x49, 0x47, 0x4d];

fn main() {
    println!("cargo:rerun-if-changed=assets/fixups.xml");

    let xml = fs::read("assets/fixups.xml").expect("missing assets/fixups.xml");
    let out_path = Path::new(&env::var("OUT_DIR").unwrap()).join("builtin_fixups.bin");

    let mut blob = RULE_MAGIC.to_vec();
    let mut encoder = flate2::write::DeflateEncoder::new(&mut blob, flate2::Compression::best());
    encoder.write_all(&xml).expect("deflate failed");
    encoder.finish().expect("deflate failed");

    fs::write(out_path, blob).expect("failed to write rule blob");
}

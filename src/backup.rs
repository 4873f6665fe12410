use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use anyhow::{bail, Context};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::StoreError;
use crate::model::Student;
use crate::roster::RecordStore;

const MANIFEST_ENTRY: &str = "manifest.json";
const RECORDS_ENTRY: &str = "records/students.json";
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
pub const BUNDLE_FORMAT_V1: &str = "rosterd-students-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub student_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format: String,
    pub added: usize,
    pub skipped: usize,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn write_entry<W: Write + Seek>(zip: &mut ZipWriter<W>, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start {name}"))?;
    zip.write_all(bytes)
        .with_context(|| format!("failed to write {name}"))
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> anyhow::Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("bundle has no {name}"))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to read {name}"))?;
    Ok(bytes)
}

pub fn export_bundle(store: &RecordStore, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let students = store.get_all().context("failed to read students")?;
    let records = serde_json::to_vec_pretty(&students).context("failed to serialize students")?;
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "backend": store.backend_name(),
        "studentCount": students.len(),
        "recordsSha256": sha256_hex(&records),
    });

    if let Some(dir) = out_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let file = File::create(out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    let mut zip = ZipWriter::new(file);
    write_entry(&mut zip, MANIFEST_ENTRY, &serde_json::to_vec_pretty(&manifest)?)?;
    write_entry(&mut zip, RECORDS_ENTRY, &records)?;
    zip.finish().context("failed to finish bundle")?;

    info!(path = %out_path.display(), students = students.len(), "bundle exported");
    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        student_count: students.len(),
    })
}

/// Add every student in the bundle to `store`. Students whose id is already
/// present, or whose record no longer validates, are skipped.
pub fn import_bundle(store: &RecordStore, in_path: &Path) -> anyhow::Result<ImportSummary> {
    let mut file = File::open(in_path)
        .with_context(|| format!("failed to open {}", in_path.display()))?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || magic != ZIP_MAGIC {
        bail!("not a bundle archive: {}", in_path.display());
    }
    file.rewind()?;

    let mut archive = ZipArchive::new(file).context("bundle is not a readable zip")?;
    let manifest: Value = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)
        .context("manifest.json is not JSON")?;
    let field = |key: &str| manifest.get(key).and_then(Value::as_str).unwrap_or_default();
    if field("format") != BUNDLE_FORMAT_V1 {
        bail!("unsupported bundle format: {:?}", field("format"));
    }

    let records = read_entry(&mut archive, RECORDS_ENTRY)?;
    if sha256_hex(&records) != field("recordsSha256") {
        bail!("records checksum mismatch");
    }
    let students: Vec<Student> =
        serde_json::from_slice(&records).context("records/students.json is invalid")?;

    let (mut added, mut skipped) = (0, 0);
    for student in students {
        let id = student.id.clone();
        match store.add(student) {
            Ok(_) => added += 1,
            Err(StoreError::Conflict(_)) => skipped += 1,
            Err(StoreError::Validation(reason)) => {
                warn!(student_id = %id, reason = %reason, "skipping invalid student in bundle");
                skipped += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("failed to import student {id}")),
        }
    }

    info!(path = %in_path.display(), added, skipped, "bundle imported");
    Ok(ImportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        added,
        skipped,
    })
}

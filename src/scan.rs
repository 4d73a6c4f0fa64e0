use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jitlens::compilations::CompilationHistory;
use jitlens::disassembly::decode_class;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use tracing::debug;

/// File extensions accepted as `javap` listings when walking directories.
const LISTING_EXTENSIONS: &[&str] = &["javap", "txt"];

/// Compilation history loaded from disk plus the artifacts it was read from.
pub(crate) struct ScanOutput {
    pub(crate) history: CompilationHistory,
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) class_count: usize,
    pub(crate) log_lines: usize,
}

pub(crate) fn scan_inputs(log: &Path, bytecode: &[PathBuf]) -> Result<ScanOutput> {
    let mut output = ScanOutput {
        history: CompilationHistory::new(),
        artifacts: Vec::new(),
        class_count: 0,
        log_lines: 0,
    };

    scan_log(log, &mut output)?;

    // Keep deterministic ordering by sorting bytecode entries and directory listings.
    let mut entries = bytecode.to_vec();
    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        scan_path(&entry, true, &mut output)?;
    }

    Ok(output)
}

fn scan_log(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut len = 0;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        len += line.len() as u64 + 1;
        output
            .history
            .ingest_line(&line)
            .with_context(|| format!("failed to parse {} at line {}", path.display(), index + 1))?;
        output.log_lines += 1;
    }
    debug!(log = %path.display(), lines = output.log_lines, "ingested compilation log");

    let roles = Some(vec![
        serde_json::to_value(ArtifactRoles::AnalysisTarget).context("serialize artifact role")?,
    ]);
    push_artifact(path_to_uri(path), len, roles, &mut output.artifacts);
    Ok(())
}

fn scan_path(path: &Path, strict: bool, output: &mut ScanOutput) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, output);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    if LISTING_EXTENSIONS.contains(&extension) {
        scan_listing(path, output)
    } else if strict {
        anyhow::bail!("unsupported bytecode listing: {}", path.display())
    } else {
        Ok(())
    }
}

fn scan_dir(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, output)?;
        } else {
            scan_path(&entry, false, output)?;
        }
    }

    Ok(())
}

fn scan_listing(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let class = decode_class(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    debug!(class = %class.name, listing = %path.display(), "loaded bytecode listing");
    output.history.add_class(class);
    output.class_count += 1;

    push_artifact(path_to_uri(path), text.len() as u64, None, &mut output.artifacts);
    Ok(())
}

fn push_artifact(uri: String, len: u64, roles: Option<Vec<Value>>, artifacts: &mut Vec<Artifact>) {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match roles {
        Some(roles) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        None => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    artifacts.push(artifact);
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitlens::member::{MemberKey, MemberRepository};

    const LOG: &str = "\
<hotspot_log version='160 1' process='1'>
<compilation_log thread='7'>
<task compile_id='1' method='com/example/Foo run ()V' bytes='1'>
</task>
</compilation_log>
</hotspot_log>
";

    const LISTING: &str = "\
public class com.example.Foo {
  public void run();
    Code:
       0: return
}
";

    fn run() -> MemberKey {
        MemberKey {
            class_name: "com.example.Foo".to_string(),
            member_name: "run".to_string(),
            param_types: Vec::new(),
        }
    }

    #[test]
    fn scan_inputs_loads_log_and_listing_directory() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let log = temp_dir.path().join("hotspot.log");
        fs::write(&log, LOG).expect("write log");
        let listings = temp_dir.path().join("listings");
        fs::create_dir_all(listings.join("nested")).expect("create listing dir");
        fs::write(listings.join("nested").join("Foo.javap"), LISTING).expect("write listing");
        fs::write(listings.join("README.md"), "ignored").expect("write readme");

        let output = scan_inputs(&log, &[listings]).expect("scan inputs");

        assert_eq!(1, output.class_count);
        assert_eq!(6, output.log_lines);
        assert_eq!(2, output.artifacts.len());
        assert!(output.history.is_compiled(&run()));
        assert!(output.history.bytecode(&run()).is_some());
        let first_uri = output.artifacts[0]
            .location
            .as_ref()
            .and_then(|location| location.uri.as_ref())
            .cloned()
            .expect("artifact uri");
        assert!(first_uri.ends_with("hotspot.log"));
    }

    #[test]
    fn scan_inputs_rejects_unbalanced_log() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let log = temp_dir.path().join("broken.log");
        fs::write(&log, "<task compile_id='1' method='a/B c ()V'>\n</parse>\n").expect("write log");

        let error = scan_inputs(&log, &[]).err().expect("parse failure");

        assert!(format!("{error:#}").contains("line 2"));
    }

    #[test]
    fn scan_inputs_rejects_unsupported_listing_file() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let log = temp_dir.path().join("hotspot.log");
        fs::write(&log, LOG).expect("write log");
        let class_file = temp_dir.path().join("Foo.class");
        fs::write(&class_file, b"\xca\xfe\xba\xbe").expect("write class");

        let result = scan_inputs(&log, &[class_file]);

        assert!(result.is_err());
    }
}

use anyhow::Result;
use conduit_core::config::{CONFIG_FILE, CoreConfig};
use conduit_core::utils::logging;
use conduit_core::{Entry, FileJournal, Journal};

#[test]
fn missing_file_falls_back_to_defaults() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = CoreConfig::load(dir.path())?;
    assert_eq!(cfg.window.max_chars, 2000);
    assert!(cfg.window.boundary_enabled);
    assert_eq!(cfg.multiplexer.channel_capacity, 256);
    assert_eq!(cfg.journal.dir, dir.path().join("journals"));
    Ok(())
}

#[test]
fn partial_file_keeps_defaults_for_the_rest() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join(CONFIG_FILE),
        r#"
[journal]
dir = "data/logs"
fsync = true

[window]
max_chars = 120
boundary_enabled = false

[logging]
level = "debug"
"#,
    )?;

    let cfg = CoreConfig::load(dir.path())?;
    assert_eq!(cfg.journal.dir, dir.path().join("data/logs"));
    assert!(cfg.journal.fsync);
    assert_eq!(cfg.window.max_chars, 120);
    assert_eq!(cfg.window.max_chunks, 0);
    assert!(!cfg.window.boundary_enabled);
    assert_eq!(cfg.multiplexer.poll_interval_ms, 100);
    assert_eq!(cfg.logging.level, "debug");

    assert_eq!(cfg.window.policy::<Entry>().len(), 1);
    Ok(())
}

#[test]
fn malformed_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE), "[window]\nmax_chars = \"lots\"\n").unwrap();
    let err = CoreConfig::load(dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains(CONFIG_FILE), "{err:#}");
}

#[tokio::test]
async fn journals_open_under_the_configured_dir() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = CoreConfig::load(dir.path())?;
    logging::init(&cfg.logging);
    logging::init(&cfg.logging);

    let journal: FileJournal<Entry> = FileJournal::open_in(&cfg.journal, "session").await?;
    journal.append(Entry::afferent("u", "hi")).await?;
    assert_eq!(journal.path(), dir.path().join("journals/session.ndjson"));
    assert!(journal.path().exists());
    Ok(())
}

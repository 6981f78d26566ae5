use tempdir::TempDir;

use htdma_fit::config::{Config, InversionSettings};
use htdma_fit::{Error, Result};

#[test]
fn configuration_is_read_from_disk() -> Result<()> {
    let tmp_dir = TempDir::new("config_from_disk").unwrap();
    let path = tmp_dir.path().join("htdma.toml");

    let mut config = Config::default();
    config.inversion = InversionSettings {
        charges: 2,
        tolerance_nm: 0.01,
        ..InversionSettings::default()
    };
    config.fit.max_solver_iterations = 250;
    std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

    let read = Config::from_file(&path)?;
    assert_eq!(read, config);
    Ok(())
}

#[test]
fn missing_files_are_io_errors() {
    let tmp_dir = TempDir::new("config_missing").unwrap();
    let result = Config::from_file(&tmp_dir.path().join("absent.toml"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn malformed_files_are_config_errors() {
    let tmp_dir = TempDir::new("config_malformed").unwrap();
    let path = tmp_dir.path().join("htdma.toml");
    std::fs::write(&path, "[gas\nviscosity_pa_s = 1").unwrap();

    assert!(matches!(Config::from_file(&path), Err(Error::Config(_))));
}

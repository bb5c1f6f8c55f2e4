use std::path::PathBuf;

use clap::Parser;
use konspectoctl::{Cli, Commands, OutputFormat};

#[test]
fn parses_convert_with_global_overrides() {
    let cli = Cli::try_parse_from([
        "konspectoctl",
        "--work-dir",
        "/tmp/k/work",
        "--store",
        "/tmp/k/artifacts.sqlite",
        "--format",
        "json",
        "convert",
        "https://youtu.be/dQw4w9WgXcQ",
    ])
    .unwrap();
    assert_eq!(cli.format, OutputFormat::Json);
    assert_eq!(cli.work_dir, Some(PathBuf::from("/tmp/k/work")));
    match cli.command {
        Commands::Convert(args) => assert_eq!(args.url, "https://youtu.be/dQw4w9WgXcQ"),
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn parses_fetch_with_output() {
    let cli = Cli::try_parse_from(["konspectoctl", "fetch", "docx:abc", "-o", "notes.docx"]).unwrap();
    assert_eq!(cli.format, OutputFormat::Text);
    match cli.command {
        Commands::Fetch(args) => {
            assert_eq!(args.key, "docx:abc");
            assert_eq!(args.output, Some(PathBuf::from("notes.docx")));
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn list_limit_has_a_default() {
    let cli = Cli::try_parse_from(["konspectoctl", "list"]).unwrap();
    match cli.command {
        Commands::List(args) => assert_eq!(args.limit, 20),
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn convert_requires_a_url() {
    assert!(Cli::try_parse_from(["konspectoctl", "convert"]).is_err());
    assert!(Cli::try_parse_from(["konspectoctl", "--format", "yaml", "purge"]).is_err());
}

#[test]
fn config_file_is_loaded_and_overridden() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("configs")
        .join("konspecto.toml");
    let store = temp.path().join("artifacts.sqlite");
    let cli = Cli::try_parse_from([
        "konspectoctl".into(),
        "--config".into(),
        config.into_os_string(),
        "--store".into(),
        store.clone().into_os_string(),
        "purge".into(),
    ])
    .unwrap();
    konspectoctl::run(cli).unwrap();
    assert!(store.exists());
}

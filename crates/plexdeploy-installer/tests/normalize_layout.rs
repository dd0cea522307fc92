mod common;

use std::time::Duration;

use common::{list_names, write_zip, Entry};
use plexdeploy_core::error::ArchiveError;
use plexdeploy_installer::normalize::extract_and_normalize;

const TIMEOUT: Duration = Duration::from_secs(30);

#[test]
fn single_top_level_directory_is_kept_as_is() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("addons");
    let archive = dir.path().join("Whatever-main.zip");
    write_zip(
        &archive,
        &[
            Entry::Dir("Stats/"),
            Entry::File("Stats/config.yml", "a: 1"),
            Entry::File("Stats/lib/index.js", "x"),
        ],
    );

    let out = extract_and_normalize(&archive, &dest, TIMEOUT).unwrap();
    assert_eq!(out.name, "Stats");
    assert_eq!(out.folder, dest.join("Stats"));
    assert!(!out.repackaged);
    assert!(out.warnings.is_empty());
    assert_eq!(list_names(&dest), vec!["Stats".to_string()]);
    assert_eq!(
        list_names(&dest.join("Stats")),
        vec!["config.yml".to_string(), "lib".to_string()]
    );
    assert!(dest.join("Stats/lib/index.js").is_file());
}

#[test]
fn repeated_normalization_on_clean_destination_gives_same_result() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("Stats-main.zip");
    write_zip(
        &archive,
        &[
            Entry::File("Stats/config.yml", "a: 1"),
            Entry::File("Stats/index.js", "x"),
        ],
    );

    let mut seen = Vec::new();
    for round in 0..2 {
        let dest = dir.path().join(format!("addons-{round}"));
        let out = extract_and_normalize(&archive, &dest, TIMEOUT).unwrap();
        assert_eq!(list_names(&dest), vec![out.name.clone()]);
        assert_eq!(
            list_names(&out.folder),
            vec!["config.yml".to_string(), "index.js".to_string()]
        );
        seen.push((out.name, out.repackaged));
    }
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[0], ("Stats".to_string(), false));
}

#[test]
fn loose_files_are_wrapped_under_derived_name() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("addons");
    std::fs::create_dir_all(dest.join("Other")).unwrap();
    let archive = dir.path().join("MyAddon-v2.zip");
    write_zip(
        &archive,
        &[
            Entry::File("index.js", "x"),
            Entry::File("config.yml", "a: 1"),
            Entry::File("README.md", "docs"),
        ],
    );

    let out = extract_and_normalize(&archive, &dest, TIMEOUT).unwrap();
    assert_eq!(out.name, "MyAddon");
    assert!(out.repackaged);
    assert_eq!(out.warnings.len(), 1);
    assert!(out.warnings[0].contains("MyAddon/"));
    assert_eq!(
        list_names(&dest),
        vec!["MyAddon".to_string(), "Other".to_string()]
    );
    assert_eq!(
        list_names(&dest.join("MyAddon")),
        vec![
            "README.md".to_string(),
            "config.yml".to_string(),
            "index.js".to_string()
        ]
    );
    assert!(list_names(&dest.join("Other")).is_empty());
}

#[test]
fn single_loose_file_is_wrapped_too() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("addons");
    let archive = dir.path().join("tool.zip");
    write_zip(&archive, &[Entry::File("tool.js", "x")]);

    let out = extract_and_normalize(&archive, &dest, TIMEOUT).unwrap();
    assert_eq!(out.name, "tool");
    assert!(out.repackaged);
    assert!(dest.join("tool").join("tool.js").is_file());
    assert_eq!(list_names(&dest), vec!["tool".to_string()]);
}

#[test]
fn loose_file_named_like_derived_folder_moves_inside() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("addons");
    let archive = dir.path().join("notes.zip");
    write_zip(
        &archive,
        &[Entry::File("notes", "plain file"), Entry::File("other.txt", "y")],
    );

    let out = extract_and_normalize(&archive, &dest, TIMEOUT).unwrap();
    assert_eq!(out.name, "notes");
    assert!(dest.join("notes").is_dir());
    assert_eq!(
        std::fs::read_to_string(dest.join("notes").join("notes")).unwrap(),
        "plain file"
    );
    assert!(dest.join("notes").join("other.txt").is_file());
    assert_eq!(list_names(&dest), vec!["notes".to_string()]);
}

#[test]
fn collision_with_existing_folder_leaves_it_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("addons");
    std::fs::create_dir_all(dest.join("Stats")).unwrap();
    std::fs::write(dest.join("Stats").join("config.yml"), "mine: true").unwrap();

    let archive = dir.path().join("Stats.zip");
    write_zip(
        &archive,
        &[
            Entry::File("Stats/config.yml", "theirs: true"),
            Entry::File("Stats/new.js", "x"),
        ],
    );

    let err = extract_and_normalize(&archive, &dest, TIMEOUT).unwrap_err();
    assert!(matches!(err, ArchiveError::NameCollision { ref name } if name == "Stats"), "{err:?}");
    assert_eq!(list_names(&dest), vec!["Stats".to_string()]);
    assert_eq!(list_names(&dest.join("Stats")), vec!["config.yml".to_string()]);
    assert_eq!(
        std::fs::read_to_string(dest.join("Stats").join("config.yml")).unwrap(),
        "mine: true"
    );
}

#[test]
fn loose_files_colliding_with_existing_derived_folder_are_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("addons");
    std::fs::create_dir_all(dest.join("Stats")).unwrap();

    let archive = dir.path().join("Stats-addon.zip");
    write_zip(
        &archive,
        &[Entry::File("a.js", "x"), Entry::File("b.js", "y")],
    );

    let err = extract_and_normalize(&archive, &dest, TIMEOUT).unwrap_err();
    assert!(matches!(err, ArchiveError::NameCollision { .. }), "{err:?}");
    assert_eq!(list_names(&dest), vec!["Stats".to_string()]);
    assert!(list_names(&dest.join("Stats")).is_empty());
}

#[test]
fn ambiguous_archive_name_fails_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("addons");
    let archive = dir.path().join("-main.zip");
    write_zip(
        &archive,
        &[Entry::File("a.js", "x"), Entry::File("b.js", "y")],
    );

    let err = extract_and_normalize(&archive, &dest, TIMEOUT).unwrap_err();
    assert!(matches!(err, ArchiveError::AmbiguousName { .. }), "{err:?}");
    assert!(!dest.exists());
}

#[test]
fn empty_archive_reports_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("addons");
    std::fs::create_dir_all(&dest).unwrap();
    let archive = dir.path().join("empty.zip");
    write_zip(&archive, &[]);

    let err = extract_and_normalize(&archive, &dest, TIMEOUT).unwrap_err();
    assert!(matches!(err, ArchiveError::NoFilesExtracted), "{err:?}");
    assert!(list_names(&dest).is_empty());
}

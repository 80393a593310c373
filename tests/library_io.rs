//! Persistence, backup and import behavior seen through the library handle.

mod common;

use std::fs;

use common::Fixture;
use gamedock::error::ErrorCode;
use gamedock::schema::sanitize_document_at;
use gamedock::storage::DATA_FILE_NAME;
use serde_json::json;

#[tokio::test]
async fn steam_import_skips_known_and_repeated_paths() {
    let fx = Fixture::new();
    fx.seed(json!({ "games": [{ "id": 1, "name": "Quake", "path": "C:\\Games\\Quake\\quake.exe" }] }));
    let (library, _task) = fx.start();

    let summary = library
        .import_steam_games(vec![
            json!({ "name": "Quake again", "path": "c:/games/quake/QUAKE.EXE" }),
            json!({ "name": "Portal", "path": "D:\\Steam\\steamapps\\common\\Portal\\portal.exe", "steamAppId": 400 }),
            json!({ "name": "Portal dup", "path": "d:\\steam\\steamapps\\common\\portal\\PORTAL.exe" }),
            json!({ "name": "Readme", "path": "D:\\Steam\\readme.txt" }),
        ])
        .await
        .unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.skipped, 3);

    let data = library.get_data().await.unwrap();
    assert_eq!(data.games.len(), 2);
    let portal = &data.games[1];
    assert_eq!(portal.name, "Portal");
    assert_eq!(portal.steam_app_id, Some(400));
    assert_eq!(portal.total_play_time(), 0);
    assert!(portal.id > 1);
    assert_eq!(fx.on_disk()["games"].as_array().unwrap().len(), 2);
}

#[test]
fn staged_write_leaves_the_store_untouched_until_commit() {
    let fx = Fixture::new();
    fx.seed(json!({ "games": [{ "id": 1, "name": "Old", "path": fx.exe }] }));
    let before = fs::read(fx.data_file()).unwrap();

    let store = fx.store();
    let next = sanitize_document_at(
        &json!({ "games": [{ "id": 2, "name": "New", "path": fx.exe }] }),
        common::T0,
    );
    let staged = store.stage(&next).unwrap();
    let temp = staged.temp_path().to_path_buf();
    assert!(temp.exists());
    // Simulated crash between write and rename.
    drop(staged);
    assert_eq!(fs::read(fx.data_file()).unwrap(), before);

    // The next start sweeps the orphaned temp file and loads the old data.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let (library, _task) = fx.start();
        let data = library.get_data().await.unwrap();
        assert_eq!(data.games[0].name, "Old");
    });
    assert!(!temp.exists());
}

#[tokio::test]
async fn export_then_import_restores_the_library() {
    let fx = Fixture::new();
    fx.seed(json!({
        "games": [
            { "id": 1, "name": "Celeste", "path": fx.exe, "totalPlayTime": 30, "category": "Indie" },
        ],
        "categories": ["Indie"],
    }));
    let (library, _task) = fx.start();

    let backup = fx.dir.path().join("backup.json");
    let written = library.export_data(Some(backup.clone())).await.unwrap();
    assert_eq!(written, backup);
    let exported: serde_json::Value = serde_json::from_slice(&fs::read(&backup).unwrap()).unwrap();
    assert_eq!(exported["games"][0]["name"], json!("Celeste"));

    library.delete_game(1).await.unwrap();
    assert!(library.get_data().await.unwrap().games.is_empty());

    let restored = library.import_data(backup).await.unwrap();
    assert_eq!(restored.games.len(), 1);
    assert_eq!(restored.games[0].total_play_time(), 30);
    assert_eq!(restored.games[0].category, "Indie");
    assert_eq!(fx.on_disk()["games"][0]["name"], json!("Celeste"));
}

#[tokio::test]
async fn importing_garbage_keeps_the_current_library() {
    let fx = Fixture::new();
    fx.seed(json!({ "games": [{ "id": 1, "name": "Keep", "path": fx.exe }] }));
    let (library, _task) = fx.start();

    let bad = fx.dir.path().join("bad.json");
    fs::write(&bad, "{ not json").unwrap();
    let err = library.import_data(bad).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ImportFail);

    let array = fx.dir.path().join("array.json");
    fs::write(&array, "[1, 2, 3]").unwrap();
    let err = library.import_data(array).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ImportFail);

    let err = library
        .import_data(fx.dir.path().join("missing.json"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ImportFail);

    let data = library.get_data().await.unwrap();
    assert_eq!(data.games[0].name, "Keep");
}

#[tokio::test]
async fn corrupt_store_is_quarantined_and_replaced_by_defaults() {
    let fx = Fixture::new();
    fs::write(fx.data_file(), "{\"games\": [").unwrap();
    let (library, _task) = fx.start();

    let data = library.get_data().await.unwrap();
    assert!(data.games.is_empty());
    assert!(!data.categories.is_empty());

    let quarantined: Vec<_> = fs::read_dir(fx.dir.path())
        .unwrap()
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(&format!("{DATA_FILE_NAME}.corrupt-")))
        .collect();
    assert_eq!(quarantined.len(), 1);
}

#[tokio::test]
async fn save_data_sanitizes_and_persists_client_edits() {
    let fx = Fixture::new();
    fx.seed(json!({ "games": [{ "id": 1, "name": "Doom", "path": fx.exe, "totalPlayTime": 12 }] }));
    let (library, _task) = fx.start();

    let saved = library
        .save_data(json!({
            "games": [
                { "id": 1, "name": "  Doom Eternal  ", "path": fx.exe, "totalPlayTime": 9999, "category": "Nope" },
            ],
            "categories": ["Shooter"],
            "settings": { "alwaysOnTop": true },
        }))
        .await;
    assert!(saved);

    let on_disk = fx.on_disk();
    let game = &on_disk["games"][0];
    assert_eq!(game["name"], json!("Doom Eternal"));
    assert_eq!(game["totalPlayTime"], json!(12));
    assert_eq!(on_disk["settings"]["alwaysOnTop"], json!(true));
    let category = game["category"].as_str().unwrap();
    assert!(on_disk["categories"]
        .as_array()
        .unwrap()
        .iter()
        .any(|known| known == category));
}

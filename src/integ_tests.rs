//! Integration tests for the orchestrator, worker and runner
//!
//! These tests use SQLite in-memory databases and real JSON files on disk to
//! test end to end scenarios of the pipeline.

#[cfg(test)]
mod tests {
    use crate::{
        coordination::{FileStatus, Orchestrator, Phase},
        db::{Pool, schema},
        runner::{RunArgs, RunReport, RunResult, run_pipeline},
    };
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use tokio::fs;

    const GREECE_2000: &str = r#"{"num_songs": 1, "artist_id": "AR5KOSW1187FB35FF4", "artist_latitude": 49.80388, "artist_longitude": 15.47491, "artist_location": "Dubai UAE", "artist_name": "Elena", "song_id": "SOZCTXZ12AB0182364", "title": "Setanta matins", "duration": 269.58322, "year": 0}"#;

    const CASUAL: &str = r#"{"num_songs": 1, "artist_id": "ARD7TVE1187B99BFB1", "artist_latitude": null, "artist_longitude": null, "artist_location": "California - LA", "artist_name": "Casual", "song_id": "SOMZWCG12A8C13C480", "title": "I Didn't Mean To", "duration": 218.93179, "year": 0}"#;

    // ============ Test Helpers ============

    /// Helper to write a file, creating parent directories
    async fn write_file(dir: &Path, rel_path: &str, content: &str) -> PathBuf {
        let path = dir.join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.unwrap();
        }
        fs::write(&path, content).await.unwrap();
        path
    }

    /// Helper to render one event log line
    fn event(ts: i64, user_id: &str, level: &str, page: &str, song: Option<(&str, &str, &str)>) -> String {
        let (title, artist, length) = match song {
            Some((title, artist, length)) => (
                format!("\"{}\"", title),
                format!("\"{}\"", artist),
                length.to_string(),
            ),
            None => ("null".to_string(), "null".to_string(), "null".to_string()),
        };
        format!(
            r#"{{"artist":{artist},"auth":"Logged In","firstName":"Kaylee","gender":"F","itemInSession":0,"lastName":"Summers","length":{length},"level":"{level}","location":"Phoenix-Mesa-Scottsdale, AZ","method":"PUT","page":"{page}","registration":1540344794796.0,"sessionId":139,"song":{title},"status":200,"ts":{ts},"userAgent":"\"Mozilla\/5.0 (Windows NT 6.1; WOW64)\"","userId":"{user_id}"}}"#
        )
    }

    fn log_file(events: &[String]) -> String {
        let mut content = events.join("\n");
        content.push('\n');
        content
    }

    /// Helper to create a SQLite pool with the five tables
    async fn setup_pool() -> Pool {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        schema::create_tables(&pool).await.unwrap();
        pool
    }

    /// Helper to create song_data and log_data roots under one temp dir
    async fn setup_data() -> (TempDir, PathBuf, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let song_data = temp_dir.path().join("song_data");
        let log_data = temp_dir.path().join("log_data");
        fs::create_dir_all(&song_data).await.unwrap();
        fs::create_dir_all(&log_data).await.unwrap();
        (temp_dir, song_data, log_data)
    }

    /// Helper to run the whole pipeline against a test pool
    async fn run(pool: &Pool, song_data: &Path, log_data: &Path) -> RunResult {
        run_with(pool, song_data, log_data, |_| {}).await
    }

    async fn run_with(
        pool: &Pool,
        song_data: &Path,
        log_data: &Path,
        customize: impl FnOnce(&mut RunArgs),
    ) -> RunResult {
        let mut args = RunArgs {
            song_data: song_data.to_path_buf(),
            log_data: log_data.to_path_buf(),
            quiet: true,
            test_pool: Some(pool.clone()),
            ..Default::default()
        };
        customize(&mut args);
        run_pipeline(args).await.unwrap()
    }

    /// Helper to query table row count
    async fn get_table_count(pool: &Pool, table_name: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", table_name);
        let (count,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(pool.sqlite())
            .await
            .unwrap();
        count
    }

    async fn get_user_level(pool: &Pool, user_id: i32) -> String {
        let (level,): (String,) = sqlx::query_as("SELECT level FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool.sqlite())
            .await
            .unwrap();
        level
    }

    async fn get_catalog_rows(pool: &Pool) -> Vec<(String, String, String, f64)> {
        sqlx::query_as(
            "SELECT s.song_id, s.title, a.name, s.duration_float \
             FROM songs s JOIN artists a ON s.artist_id = a.artist_id ORDER BY s.song_id",
        )
        .fetch_all(pool.sqlite())
        .await
        .unwrap()
    }

    async fn standard_fixture(song_data: &Path, log_data: &Path) {
        write_file(song_data, "A/A/A/TRAAAAW128F429D538.json", GREECE_2000).await;
        write_file(song_data, "A/A/B/TRAABJL12903CDCF1A.json", CASUAL).await;
        // Stale notebook copy, must not be loaded
        write_file(
            song_data,
            "A/A/B/.ipynb_checkpoints/TRAABJL12903CDCF1A-checkpoint.json",
            "not even json",
        )
        .await;

        let events = [
            event(1541105830796, "8", "free", "NextSong", Some(("Setanta matins", "Elena", "269.58322"))),
            event(1541106106796, "8", "free", "Home", None),
            event(1541106352796, "8", "free", "NextSong", Some(("Unknown Track", "Nobody", "100.0"))),
            event(1541106496796, "15", "paid", "NextSong", Some(("I Didn't Mean To", "Casual", "218.93179"))),
        ];
        write_file(log_data, "2018/11/2018-11-01-events.json", &log_file(&events)).await;
    }

    // ============ Tests ============

    #[tokio::test]
    async fn test_full_run_loads_star_schema() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        standard_fixture(&song_data, &log_data).await;
        let pool = setup_pool().await;

        let result = run(&pool, &song_data, &log_data).await;

        assert_eq!(result.failed_files(), 0);
        assert_eq!(result.catalog.files_found(), 2, "checkpoint copy excluded");
        assert_eq!(result.events.files_found(), 1);

        assert_eq!(get_table_count(&pool, "songs").await, 2);
        assert_eq!(get_table_count(&pool, "artists").await, 2);
        assert_eq!(get_table_count(&pool, "users").await, 2);
        assert_eq!(get_table_count(&pool, "time").await, 3);
        assert_eq!(get_table_count(&pool, "songplays").await, 3);

        let rows = result.rows();
        assert_eq!(rows.songs, 2);
        assert_eq!(rows.artists, 2);
        assert_eq!(rows.time, 3);
        assert_eq!(rows.songplays, 3);

        let plays: Vec<(i32, Option<String>, Option<String>, String, Option<String>)> = sqlx::query_as(
            "SELECT user_id, song_id, artist_id, session_id, user_agent FROM songplays ORDER BY songplay_id",
        )
        .fetch_all(pool.sqlite())
        .await
        .unwrap();

        // Enrichment hit, miss, hit, in log order
        assert_eq!(plays[0].1.as_deref(), Some("SOZCTXZ12AB0182364"));
        assert_eq!(plays[0].2.as_deref(), Some("AR5KOSW1187FB35FF4"));
        assert_eq!(plays[1].1, None);
        assert_eq!(plays[1].2, None);
        assert_eq!(plays[2].0, 15);
        assert_eq!(plays[2].1.as_deref(), Some("SOMZWCG12A8C13C480"));

        assert_eq!(plays[0].3, "139");
        assert_eq!(
            plays[0].4.as_deref(),
            Some("Mozilla/5.0 (Windows NT 6.1; WOW64)")
        );
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent_except_for_songplays() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        standard_fixture(&song_data, &log_data).await;
        let pool = setup_pool().await;

        run(&pool, &song_data, &log_data).await;
        let catalog_after_first = get_catalog_rows(&pool).await;
        let users = get_table_count(&pool, "users").await;
        let times = get_table_count(&pool, "time").await;
        let songplays = get_table_count(&pool, "songplays").await;

        let second = run(&pool, &song_data, &log_data).await;

        assert_eq!(get_catalog_rows(&pool).await, catalog_after_first);
        assert_eq!(get_table_count(&pool, "users").await, users);
        assert_eq!(get_table_count(&pool, "time").await, times);
        assert_eq!(get_table_count(&pool, "songplays").await, songplays * 2);

        // The second catalog pass was all conflicting no-ops
        assert_eq!(second.catalog.rows().songs, 0);
        assert_eq!(second.catalog.rows().artists, 0);
        assert_eq!(second.events.rows().time, 0);
    }

    #[tokio::test]
    async fn test_truncate_songplays_prevents_duplicates() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        standard_fixture(&song_data, &log_data).await;
        let pool = setup_pool().await;

        run(&pool, &song_data, &log_data).await;
        run_with(&pool, &song_data, &log_data, |args| {
            args.truncate_songplays = true
        })
        .await;

        assert_eq!(get_table_count(&pool, "songplays").await, 3);
        assert_eq!(get_table_count(&pool, "songs").await, 2);
    }

    #[tokio::test]
    async fn test_reset_schema_creates_tables() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        standard_fixture(&song_data, &log_data).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        run_with(&pool, &song_data, &log_data, |args| args.reset_schema = true).await;
        assert_eq!(get_table_count(&pool, "songplays").await, 3);

        // A reset wipes the previous load
        run_with(&pool, &song_data, &log_data, |args| args.reset_schema = true).await;
        assert_eq!(get_table_count(&pool, "songplays").await, 3);
    }

    #[tokio::test]
    async fn test_latest_level_wins_regardless_of_order() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        let pool = setup_pool().await;

        // Newest event first in the file
        let events = [
            event(2000, "7", "paid", "NextSong", None),
            event(1000, "7", "free", "NextSong", None),
        ];
        write_file(&log_data, "reversed.json", &log_file(&events)).await;

        run(&pool, &song_data, &log_data).await;
        assert_eq!(get_user_level(&pool, 7).await, "paid");
        assert_eq!(get_table_count(&pool, "users").await, 1);
    }

    #[tokio::test]
    async fn test_level_upgrade_across_files() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        let pool = setup_pool().await;

        // Traversal order is not sorted, so each day gets its own run
        let day1 = write_file(
            &log_data,
            "day1.json",
            &log_file(&[event(1000, "7", "free", "NextSong", None)]),
        )
        .await;
        run(&pool, &song_data, &log_data).await;
        assert_eq!(get_user_level(&pool, 7).await, "free");

        fs::remove_file(&day1).await.unwrap();
        write_file(
            &log_data,
            "day2.json",
            &log_file(&[event(2000, "7", "paid", "NextSong", None)]),
        )
        .await;
        let result = run(&pool, &song_data, &log_data).await;

        assert_eq!(result.failed_files(), 0);
        assert_eq!(result.events.rows().users, 1);
        assert_eq!(get_user_level(&pool, 7).await, "paid");
        assert_eq!(get_table_count(&pool, "users").await, 1);
    }

    #[tokio::test]
    async fn test_level_within_one_file_takes_latest_event() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        let pool = setup_pool().await;

        write_file(
            &log_data,
            "day1.json",
            &log_file(&[
                event(1000, "7", "free", "NextSong", None),
                event(2000, "7", "paid", "NextSong", None),
            ]),
        )
        .await;

        let result = run(&pool, &song_data, &log_data).await;
        assert_eq!(result.failed_files(), 0);
        assert_eq!(get_user_level(&pool, 7).await, "paid");
    }

    #[tokio::test]
    async fn test_catalog_nulls_are_loaded_as_is() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        let pool = setup_pool().await;

        let untitled = CASUAL
            .replace(r#""I Didn't Mean To""#, "null")
            .replace(r#""year": 0"#, r#""year": null"#);
        write_file(&song_data, "A/untitled.json", &untitled).await;
        let untitled_key = CASUAL.replace(r#""title": "I Didn't Mean To", "#, "");
        write_file(&song_data, "B/no_title_key.json", &untitled_key).await;

        let result = run(&pool, &song_data, &log_data).await;

        assert_eq!(result.catalog.files_found(), 2);
        assert_eq!(result.catalog.files_failed(), 1);
        let (title, year): (Option<String>, Option<i64>) =
            sqlx::query_as("SELECT title, year FROM songs WHERE song_id = 'SOMZWCG12A8C13C480'")
                .fetch_one(pool.sqlite())
                .await
                .unwrap();
        assert!(title.is_none());
        assert!(year.is_none());

        let failed = result.catalog.outcomes.iter().find(|o| o.is_failed()).unwrap();
        assert!(failed.path.ends_with("B/no_title_key.json"));
        assert!(failed.error.as_deref().unwrap().contains("Missing required field 'title'"));
    }

    #[tokio::test]
    async fn test_filtering_keeps_only_song_plays() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        let pool = setup_pool().await;

        let mut events = Vec::new();
        for i in 0..10i64 {
            let page = if i % 3 == 1 { "Home" } else { "NextSong" };
            // Users of filtered events never appear anywhere
            let user_id = if page == "Home" { "99" } else { "8" };
            events.push(event(1541105830796 + i * 1000, user_id, "free", page, None));
        }
        write_file(&log_data, "mixed.json", &log_file(&events)).await;

        let result = run(&pool, &song_data, &log_data).await;

        // i = 1, 4, 7 are filtered
        assert_eq!(result.events.rows().songplays, 7);
        assert_eq!(get_table_count(&pool, "songplays").await, 7);
        assert_eq!(get_table_count(&pool, "time").await, 7);
        assert_eq!(get_table_count(&pool, "users").await, 1);
    }

    #[tokio::test]
    async fn test_failed_file_is_counted_and_run_continues() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        standard_fixture(&song_data, &log_data).await;
        write_file(&song_data, "B/broken.json", r#"{"song_id": "SOBROKEN"}"#).await;
        write_file(
            &log_data,
            "2018/11/2018-11-02-events.json",
            &format!("{}\n{{not json\n", event(1541203200000, "20", "free", "NextSong", None)),
        )
        .await;
        let pool = setup_pool().await;

        let result = run(&pool, &song_data, &log_data).await;

        assert_eq!(result.catalog.files_failed(), 1);
        assert_eq!(result.events.files_failed(), 1);
        assert_eq!(result.failed_files(), 2);

        // Good files still loaded, nothing from the broken ones
        assert_eq!(get_table_count(&pool, "songs").await, 2);
        assert_eq!(get_table_count(&pool, "songplays").await, 3);
        let (user_20,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE user_id = 20")
            .fetch_one(pool.sqlite())
            .await
            .unwrap();
        assert_eq!(user_20, 0);

        let failed: Vec<_> = result
            .events
            .outcomes
            .iter()
            .filter(|o| o.status == FileStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].path.ends_with("2018/11/2018-11-02-events.json"));
        assert!(failed[0].error.as_deref().unwrap().contains("line 2"));
    }

    #[tokio::test]
    async fn test_failed_bulk_copy_rolls_back_dimension_rows() {
        let (_temp_dir, song_data, log_data) = setup_data().await;
        standard_fixture(&song_data, &log_data).await;
        let pool = setup_pool().await;
        pool.execute_query("DROP TABLE songplays").await.unwrap();

        let result = run(&pool, &song_data, &log_data).await;

        assert_eq!(result.catalog.files_failed(), 0);
        assert_eq!(result.events.files_failed(), 1);
        let error = result.events.outcomes[0].error.clone().unwrap();
        assert!(error.contains("songplays"), "unexpected error: {}", error);

        // Time and user rows were written before the copy and rolled back with it
        assert_eq!(get_table_count(&pool, "time").await, 0);
        assert_eq!(get_table_count(&pool, "users").await, 0);
    }

    #[tokio::test]
    async fn test_missing_root_aborts_run() {
        let (temp_dir, _song_data, log_data) = setup_data().await;
        let pool = setup_pool().await;

        let err = run_pipeline(RunArgs {
            song_data: temp_dir.path().join("does_not_exist"),
            log_data,
            quiet: true,
            test_pool: Some(pool.clone()),
            ..Default::default()
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("does_not_exist"));
    }

    #[tokio::test]
    async fn test_run_report_written() {
        let (temp_dir, song_data, log_data) = setup_data().await;
        standard_fixture(&song_data, &log_data).await;
        write_file(&song_data, "B/broken.json", "{").await;
        let pool = setup_pool().await;
        let report_path = temp_dir.path().join("out").join("report.json");

        let result = run_with(&pool, &song_data, &log_data, |args| {
            args.report_path = Some(report_path.clone())
        })
        .await;
        assert_eq!(result.report_path.as_deref(), Some(report_path.as_path()));

        let text = fs::read_to_string(&report_path).await.unwrap();
        let report: RunReport = serde_json::from_str(&text).unwrap();
        assert_eq!(report.run_id, result.run_id);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.phases.len(), 2);
        assert_eq!(report.phases[0].phase, Phase::Catalog);
        assert_eq!(report.phases[0].files_found, 3);
        assert_eq!(report.phases[1].rows.songplays, 3);
    }

    #[tokio::test]
    async fn test_orchestrator_processes_every_located_file() {
        let (_temp_dir, song_data, _log_data) = setup_data().await;
        for i in 0..5 {
            let doc = CASUAL
                .replace("SOMZWCG12A8C13C480", &format!("SONG{:014}", i))
                .replace("ARD7TVE1187B99BFB1", &format!("ARTIST{:012}", i));
            write_file(&song_data, &format!("X/{}.json", i), &doc).await;
        }
        write_file(&song_data, "X/notes.txt", "not a source file").await;
        let pool = setup_pool().await;

        let orchestrator = Orchestrator::new(pool.clone(), "*.json", ".ipynb_checkpoints", true);
        let summary = orchestrator.run_phase(Phase::Catalog, &song_data).await.unwrap();

        assert_eq!(summary.files_found(), 5);
        assert_eq!(summary.files_failed(), 0);
        assert_eq!(summary.rows().songs, 5);
        assert!(summary.outcomes.iter().all(|o| o.path.is_absolute()));
        assert_eq!(get_table_count(&pool, "artists").await, 5);
    }
}

mod common;

use common::{seed_series, test_registry};
use manga_mirror::db::RegistryError;
use manga_mirror::models::{NewTask, SeriesFilter, SeriesStatus, TaskStatus, UpdateSeries};

fn new_task(number: f64, weight: i64) -> NewTask {
    NewTask {
        chapter_url: format!("https://src.example/x/chapter-{}", number),
        chapter_number: number,
        weight,
        source_id: None,
    }
}

#[tokio::test]
async fn create_series_attaches_sources_and_schedules_first_scan() {
    let registry = test_registry().await;
    let created = seed_series(
        &registry,
        "ext-1",
        &[
            "https://asura.gg/series/solo-leveling/",
            "https://flamecomics.com/series/solo-leveling",
        ],
    )
    .await;

    assert_eq!(created.series.status, SeriesStatus::Idle);
    assert!(created.series.next_scan_at.is_some());
    assert_eq!(created.series.check_interval_minutes, 360);
    assert!(created.series.auto_sync_enabled);

    assert_eq!(created.sources.len(), 2);
    assert_eq!(created.sources[0].priority, 1);
    assert_eq!(created.sources[1].priority, 2);

    // The primary source is denormalized onto the series row.
    assert_eq!(created.series.source_domain, "asura.gg");
    assert_eq!(created.series.manga_slug, "solo-leveling");
    assert_eq!(created.series.manga_url, "https://asura.gg/series/solo-leveling/");
}

#[tokio::test]
async fn series_are_reachable_by_external_id() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-42", &["https://asura.gg/series/a"]).await;

    let by_external = registry
        .get_series_by_external_id("ext-42")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_external.id, created.series.id);
    assert!(registry
        .get_series_by_external_id("nope")
        .await
        .unwrap()
        .is_none());

    let enabled = registry.enabled_sources(created.series.id).await.unwrap();
    assert_eq!(enabled.len(), 1);
    sqlx::query("UPDATE series_source SET is_enabled = 0 WHERE series_id = ?")
        .bind(created.series.id)
        .execute(registry.pool())
        .await
        .unwrap();
    assert!(registry
        .enabled_sources(created.series.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn create_series_rejects_duplicate_external_id() {
    let registry = test_registry().await;
    seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;

    let err = registry
        .create_series(&common::create_spec("ext-1", &["https://asura.gg/series/b"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
}

#[tokio::test]
async fn replace_sources_enforces_bounds_and_reassigns_priorities() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;

    let too_many: Vec<String> = (0..4)
        .map(|i| format!("https://site{}.example/series/a", i))
        .collect();
    assert!(registry.replace_sources(id, &too_many).await.is_err());

    let replaced = registry
        .replace_sources(
            id,
            &[
                "https://flamecomics.com/series/a".to_string(),
                "https://asura.gg/series/a".to_string(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(replaced.len(), 2);
    assert_eq!(replaced[0].domain, "flamecomics.com");
    assert_eq!(replaced[0].priority, 1);

    let series = registry.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.source_domain, "flamecomics.com");
}

#[tokio::test]
async fn create_tasks_upserts_on_duplicate_chapter_numbers() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;

    let inserted = registry
        .create_tasks(id, &[new_task(1.0, 0), new_task(2.0, 1)])
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let before = registry.tasks_for_series(id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let inserted = registry
        .create_tasks(id, &[new_task(2.0, 1), new_task(3.0, 2)])
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let after = registry.tasks_for_series(id).await.unwrap();
    assert_eq!(after.len(), 3);

    // The pre-existing row only had its updated_at bumped.
    let old_two = before.iter().find(|t| t.chapter_number == 2.0).unwrap();
    let new_two = after.iter().find(|t| t.chapter_number == 2.0).unwrap();
    assert_eq!(new_two.id, old_two.id);
    assert!(new_two.updated_at > old_two.updated_at);
}

#[tokio::test]
async fn pending_tasks_come_back_in_weight_order() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;

    registry
        .create_tasks(id, &[new_task(3.0, 2), new_task(1.0, 0), new_task(2.0, 1)])
        .await
        .unwrap();

    let pending = registry.pending_tasks(id, 10).await.unwrap();
    let weights: Vec<i64> = pending.iter().map(|t| t.weight).collect();
    assert_eq!(weights, vec![0, 1, 2]);

    let limited = registry.pending_tasks(id, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn set_task_status_preserves_zip_and_counts_retries() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;
    registry.create_tasks(id, &[new_task(10.0, 0)]).await.unwrap();
    let task = registry.tasks_for_series(id).await.unwrap().remove(0);

    registry
        .set_task_status(task.id, TaskStatus::Scraped, Some("https://zips.example/z.zip"), None)
        .await
        .unwrap();
    registry
        .set_task_status(task.id, TaskStatus::Failed, None, Some("upload timed out"))
        .await
        .unwrap();

    let failed = registry.tasks_for_series(id).await.unwrap().remove(0);
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.error.as_deref(), Some("upload timed out"));
    // A None zip_url keeps the staged archive for resume.
    assert_eq!(failed.zip_url.as_deref(), Some("https://zips.example/z.zip"));
}

#[tokio::test]
async fn retry_failed_requeues_and_flips_series_to_syncing() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;

    assert_eq!(registry.retry_failed(id).await.unwrap(), 0);

    registry.create_tasks(id, &[new_task(1.0, 0)]).await.unwrap();
    let task = registry.tasks_for_series(id).await.unwrap().remove(0);
    registry
        .set_task_status(task.id, TaskStatus::Failed, Some("zip"), Some("boom"))
        .await
        .unwrap();
    registry
        .set_status(id, SeriesStatus::Error, Some("Some chapters failed to sync"))
        .await
        .unwrap();

    assert_eq!(registry.retry_failed(id).await.unwrap(), 1);

    let task = registry.tasks_for_series(id).await.unwrap().remove(0);
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.error.is_none());
    assert_eq!(task.zip_url.as_deref(), Some("zip"));

    let series = registry.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.status, SeriesStatus::Syncing);
}

#[tokio::test]
async fn due_series_filters_and_orders_by_priority() {
    let registry = test_registry().await;
    let low = seed_series(&registry, "low", &["https://asura.gg/series/low"]).await;
    let high = seed_series(&registry, "high", &["https://asura.gg/series/high"]).await;
    let busy = seed_series(&registry, "busy", &["https://asura.gg/series/busy"]).await;
    let disabled = seed_series(&registry, "off", &["https://asura.gg/series/off"]).await;

    registry
        .update_series(
            high.series.id,
            &UpdateSeries {
                priority: Some(10),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    registry
        .set_status(busy.series.id, SeriesStatus::Syncing, None)
        .await
        .unwrap();
    registry
        .update_series(
            disabled.series.id,
            &UpdateSeries {
                auto_sync_enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let due = registry.due_series().await.unwrap();
    let ids: Vec<i64> = due.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![high.series.id, low.series.id]);
}

#[tokio::test]
async fn force_scan_never_reverts_an_active_series() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;

    registry.set_status(id, SeriesStatus::Syncing, None).await.unwrap();
    assert!(registry.trigger_force_scan(id).await.unwrap());
    let series = registry.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.status, SeriesStatus::Syncing);

    registry
        .set_status(id, SeriesStatus::Error, Some("scan blew up"))
        .await
        .unwrap();
    assert!(registry.trigger_force_scan(id).await.unwrap());
    let series = registry.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.status, SeriesStatus::Idle);

    assert!(!registry.trigger_force_scan(9999).await.unwrap());
}

#[tokio::test]
async fn set_status_with_error_tracks_failure_streak() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;

    registry
        .set_status(id, SeriesStatus::Error, Some("first"))
        .await
        .unwrap();
    registry
        .set_status(id, SeriesStatus::Error, Some("second"))
        .await
        .unwrap();
    let series = registry.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.consecutive_failures, 2);
    assert_eq!(series.last_error.as_deref(), Some("second"));
    assert!(series.last_error_at.is_some());

    registry.set_status(id, SeriesStatus::Idle, None).await.unwrap();
    let series = registry.get_series(id).await.unwrap().unwrap();
    // A plain transition neither clears nor extends the streak.
    assert_eq!(series.consecutive_failures, 2);
}

#[tokio::test]
async fn record_scan_result_clears_failures_but_not_syncing() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;

    registry
        .set_status(id, SeriesStatus::Error, Some("flaky"))
        .await
        .unwrap();
    registry.set_status(id, SeriesStatus::Scanning, None).await.unwrap();
    registry
        .record_scan_result(
            id,
            &manga_mirror::db::series::ScanResult {
                source_chapter_count: 12,
                source_last_chapter: Some(12.0),
                next_scan_at: chrono::Utc::now().naive_utc(),
            },
        )
        .await
        .unwrap();

    let series = registry.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.status, SeriesStatus::Idle);
    assert_eq!(series.consecutive_failures, 0);
    assert!(series.last_error.is_none());
    assert_eq!(series.source_chapter_count, 12);

    // A concurrent transition to syncing must survive the scan bookkeeping.
    registry.set_status(id, SeriesStatus::Syncing, None).await.unwrap();
    registry
        .record_scan_result(
            id,
            &manga_mirror::db::series::ScanResult {
                source_chapter_count: 13,
                source_last_chapter: Some(13.0),
                next_scan_at: chrono::Utc::now().naive_utc(),
            },
        )
        .await
        .unwrap();
    let series = registry.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.status, SeriesStatus::Syncing);
}

#[tokio::test]
async fn resolve_completed_syncing_settles_stuck_series() {
    let registry = test_registry().await;
    let ok = seed_series(&registry, "ok", &["https://asura.gg/series/ok"]).await;
    let broken = seed_series(&registry, "broken", &["https://asura.gg/series/broken"]).await;

    for series in [&ok, &broken] {
        registry
            .create_tasks(series.series.id, &[new_task(1.0, 0)])
            .await
            .unwrap();
        registry
            .set_status(series.series.id, SeriesStatus::Syncing, None)
            .await
            .unwrap();
    }
    let ok_task = registry.tasks_for_series(ok.series.id).await.unwrap().remove(0);
    let broken_task = registry
        .tasks_for_series(broken.series.id)
        .await
        .unwrap()
        .remove(0);
    registry
        .set_task_status(ok_task.id, TaskStatus::Completed, None, None)
        .await
        .unwrap();
    registry
        .set_task_status(broken_task.id, TaskStatus::Failed, None, Some("boom"))
        .await
        .unwrap();

    assert_eq!(registry.resolve_completed_syncing().await.unwrap(), 2);

    let ok_series = registry.get_series(ok.series.id).await.unwrap().unwrap();
    assert_eq!(ok_series.status, SeriesStatus::Idle);
    assert!(ok_series.last_synced_at.is_some());
    assert_eq!(ok_series.sync_progress_completed, 1);

    let broken_series = registry.get_series(broken.series.id).await.unwrap().unwrap();
    assert_eq!(broken_series.status, SeriesStatus::Error);
    assert_eq!(
        broken_series.last_error.as_deref(),
        Some("Some chapters failed to sync")
    );
    assert_eq!(broken_series.sync_progress_failed, 1);
}

#[tokio::test]
async fn recovery_resumes_staged_tasks_and_recomputes_statuses() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;

    registry
        .create_tasks(id, &[new_task(1.0, 0), new_task(2.0, 1), new_task(3.0, 2)])
        .await
        .unwrap();
    let tasks = registry.tasks_for_series(id).await.unwrap();

    // t1 interrupted mid-enumeration, t2 interrupted mid-upload with a
    // staged zip, t3 already done.
    registry
        .set_task_status(tasks[0].id, TaskStatus::Scraping, None, None)
        .await
        .unwrap();
    registry
        .set_task_status(tasks[1].id, TaskStatus::Uploading, Some("https://z.example/2.zip"), None)
        .await
        .unwrap();
    registry
        .set_task_status(tasks[2].id, TaskStatus::Completed, None, None)
        .await
        .unwrap();
    registry.set_status(id, SeriesStatus::Syncing, None).await.unwrap();

    let report = registry.recover_stale_tasks().await.unwrap();
    assert_eq!(report.tasks_resumed, 1);
    assert_eq!(report.tasks_restarted, 1);
    assert_eq!(report.series_recomputed, 1);

    let tasks = registry.tasks_for_series(id).await.unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Pending);
    assert_eq!(tasks[1].status, TaskStatus::Scraped);
    assert_eq!(tasks[1].zip_url.as_deref(), Some("https://z.example/2.zip"));
    assert_eq!(tasks[2].status, TaskStatus::Completed);

    let series = registry.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.status, SeriesStatus::Syncing);
}

#[tokio::test]
async fn recovery_settles_interrupted_scans_without_tasks() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;
    registry.set_status(id, SeriesStatus::Scanning, None).await.unwrap();

    registry.recover_stale_tasks().await.unwrap();

    let series = registry.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.status, SeriesStatus::Idle);
    assert!(series.last_synced_at.is_some());
}

#[tokio::test]
async fn delete_series_cascades_to_sources_and_tasks() {
    let registry = test_registry().await;
    let created = seed_series(&registry, "ext-1", &["https://asura.gg/series/a"]).await;
    let id = created.series.id;
    registry.create_tasks(id, &[new_task(1.0, 0)]).await.unwrap();

    assert!(registry.delete_series(id).await.unwrap());
    assert!(!registry.delete_series(id).await.unwrap());

    let sources = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM series_source")
        .fetch_one(registry.pool())
        .await
        .unwrap();
    let tasks = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sync_task")
        .fetch_one(registry.pool())
        .await
        .unwrap();
    assert_eq!(sources, 0);
    assert_eq!(tasks, 0);
}

#[tokio::test]
async fn list_series_filters_by_status_and_title() {
    let registry = test_registry().await;
    seed_series(&registry, "one", &["https://asura.gg/series/one"]).await;
    let two = seed_series(&registry, "two", &["https://asura.gg/series/two"]).await;
    registry
        .set_status(two.series.id, SeriesStatus::Error, Some("x"))
        .await
        .unwrap();

    let all = registry.list_series(&SeriesFilter::default()).await.unwrap();
    assert_eq!(all.total, 2);

    let errored = registry
        .list_series(&SeriesFilter {
            status: Some(SeriesStatus::Error),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(errored.total, 1);
    assert_eq!(errored.items[0].id, two.series.id);

    let by_title = registry
        .list_series(&SeriesFilter {
            title: Some("two".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_title.total, 1);

    let paged = registry
        .list_series(&SeriesFilter {
            page: Some(2),
            page_size: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(paged.items.len(), 1);
    assert_eq!(paged.total, 2);
}

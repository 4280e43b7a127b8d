mod common;

use anyhow::Result;
use common::{listing, png, services, test_config, ScriptedHttp};
use media_archiver::app::download_use_case::DownloadUseCase;
use media_archiver::app::extract_use_case::ExtractUseCase;
use media_archiver::app::retry_use_case::RetryUseCase;
use media_archiver::app::status_use_case::StatusUseCase;
use media_archiver::constants::{ALL_EXTRACTED_FILE, PASS_COMPLETE_MARKER};
use media_archiver::gateway::artifacts::write_queue;
use media_archiver::gateway::failure_ledger::{pass_dir, FailureLedger};
use media_archiver::pipeline::processing::classify;
use media_archiver::types::WorkItem;
use serde_json::json;
use std::fs;
use tempfile::tempdir;

const FLAKY: &str = "https://i.redd.it/flaky.png";
const GONE: &str = "https://i.redd.it/gone.png";

fn server_error() -> common::Reply {
    Ok((500, "text/html".to_string(), b"<html>oops</html>".to_vec()))
}

fn seed_queue(root: &std::path::Path) -> Result<()> {
    let items = vec![
        WorkItem::new("Flaky", "pics", "a", classify(FLAKY)),
        WorkItem::new("Gone", "pics", "b", classify(GONE)),
    ];
    write_queue(root, &items)?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retry_pass_resolves_and_quarantines_the_rest() -> Result<()> {
    let root = tempdir()?;
    seed_queue(root.path())?;

    let http = ScriptedHttp::new();
    http.reply(
        FLAKY,
        vec![server_error(), server_error(), Ok((200, "image/png".to_string(), png()))],
    )
    .await;
    // GONE stays unscripted and answers 404
    let services = services(test_config(root.path()), http.clone());

    let original = DownloadUseCase::new(services.clone()).execute(None, false).await?;
    assert_eq!(original.failed, 2);
    assert_eq!(http.calls_to(FLAKY).await, 2);

    let report = RetryUseCase::new(services.clone()).execute(None).await?;
    assert_eq!(report.passes.len(), 2);
    assert_eq!(report.passes[0].pass, 1);
    assert_eq!(report.passes[0].successful, 1);
    assert_eq!(report.passes[1].total, 1);
    assert_eq!(report.resolved(), 1);
    assert_eq!(report.quarantined, 1);
    assert!(!report.cancelled);

    // a 404 is never retried inside a pass
    assert_eq!(http.calls_to(GONE).await, 3);
    assert!(root.path().join("Images").join("Flaky_pics.png").exists());
    assert!(pass_dir(root.path(), 1).join(PASS_COMPLETE_MARKER).exists());
    assert!(pass_dir(root.path(), 2).join(PASS_COMPLETE_MARKER).exists());
    assert_eq!(FailureLedger::load_resolved_count(root.path(), 1)?, 1);

    let quarantined = FailureLedger::load_quarantined(root.path())?;
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].item.url(), GONE);

    // nothing left to run; quarantine is not duplicated
    let again = RetryUseCase::new(services).execute(None).await?;
    assert!(again.passes.is_empty());
    assert_eq!(again.quarantined, 0);
    assert_eq!(FailureLedger::load_quarantined(root.path())?.len(), 1);
    assert_eq!(http.calls_to(GONE).await, 3);

    let status = StatusUseCase::execute(root.path())?;
    assert_eq!(status.passes.len(), 3);
    assert_eq!(status.quarantined, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_zero_passes_quarantines_original_failures() -> Result<()> {
    let root = tempdir()?;
    seed_queue(root.path())?;
    let http = ScriptedHttp::new();
    let services = services(test_config(root.path()), http.clone());

    DownloadUseCase::new(services.clone()).execute(None, false).await?;
    let report = RetryUseCase::new(services).execute(Some(0)).await?;

    assert!(report.passes.is_empty());
    assert_eq!(report.quarantined, 2);
    assert_eq!(http.total_calls().await, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retry_reextracts_failed_posts() -> Result<()> {
    let root = tempdir()?;
    let input = tempdir()?;
    let post = "https://www.reddit.com/r/pics/comments/d4/late_bloomer/";
    let endpoint = "https://www.reddit.com/r/pics/comments/d4/late_bloomer.json?raw_json=1";
    fs::write(input.path().join("saved.txt"), format!("{}\n", post))?;

    let http = ScriptedHttp::new();
    let unavailable = || -> common::Reply { Ok((503, "text/html".to_string(), Vec::new())) };
    http.reply(
        endpoint,
        vec![
            unavailable(),
            unavailable(),
            Ok((
                200,
                "application/json".to_string(),
                listing(json!({"title": "Late bloomer", "subreddit": "pics", "url": "https://i.redd.it/late.png"})),
            )),
        ],
    )
    .await;
    http.ok("https://i.redd.it/late.png", "image/png", png()).await;
    let services = services(test_config(root.path()), http.clone());

    let extracted = ExtractUseCase::new(services.clone()).execute(input.path(), false).await?;
    assert_eq!(extracted.failed_posts, 1);
    assert_eq!(extracted.queued, 0);

    let report = RetryUseCase::new(services).execute(None).await?;
    assert_eq!(report.reextracted_posts, 1);
    assert_eq!(report.passes.len(), 1);
    assert_eq!(report.resolved(), 1);
    assert_eq!(report.quarantined, 0);
    assert!(root.path().join("Images").join("Late_bloomer_pics.png").exists());

    let all = fs::read_to_string(root.path().join(ALL_EXTRACTED_FILE))?;
    assert!(all.contains("# Late bloomer\n"));
    assert!(all.contains("https://i.redd.it/late.png"));
    Ok(())
}

mod common;

use std::collections::HashSet;
use std::time::Duration;

use docqueue::run_coordinator::RunCoordinator;
use docqueue_core::models::{ErrorDetails, ProcessingStats, QueueStatus};

use common::{enqueue_many, queue, queue_with, setup, RUN};

#[tokio::test]
async fn claims_are_fifo_and_exclusive() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    let ids = enqueue_many(&q, RUN, 3).await;

    let first = q.claim_next_document(RUN).await.unwrap().unwrap();
    assert_eq!(first.queue_id, ids[0]);
    assert_eq!(first.status, QueueStatus::Processing);
    assert_eq!(first.claimed_by.as_deref(), Some("w1"));
    assert!(first.claimed_at.is_some());

    let second = queue(&pool, "w2").claim_next_document(RUN).await.unwrap().unwrap();
    assert_eq!(second.queue_id, ids[1]);
}

#[tokio::test]
async fn claim_is_scoped_to_run() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    q.add_document("a", "docs", "other-run", None).await.unwrap();

    assert!(q.claim_next_document(RUN).await.unwrap().is_none());
    assert!(q.claim_next_document("other-run").await.unwrap().is_some());
}

#[tokio::test]
async fn no_double_claim_under_concurrency() {
    let (_tmp, pool) = setup().await;
    let ids = enqueue_many(&queue(&pool, "seed"), RUN, 60).await;

    let mut handles = Vec::new();
    for w in 0..8 {
        let q = queue(&pool, &format!("worker-{}", w));
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(item) = q.claim_next_document(RUN).await.unwrap() {
                claimed.push(item.queue_id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(all.len(), ids.len(), "an item was claimed twice");
    assert_eq!(unique, ids.into_iter().collect::<HashSet<_>>());
}

#[tokio::test]
async fn stale_claim_is_reclaimed_by_another_worker() {
    let (_tmp, pool) = setup().await;
    let timeout = Duration::from_millis(50);
    let a = queue_with(&pool, "worker-a", timeout, 3);
    let b = queue_with(&pool, "worker-b", timeout, 3);
    a.add_document("report.pdf", "docs", RUN, None).await.unwrap();

    let claimed = a.claim_next_document(RUN).await.unwrap().unwrap();
    assert!(b.claim_next_document(RUN).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(120)).await;

    let reclaimed = b.claim_next_document(RUN).await.unwrap().unwrap();
    assert_eq!(reclaimed.queue_id, claimed.queue_id);
    assert_eq!(reclaimed.doc_id, "report.pdf");
    assert_eq!(reclaimed.claimed_by.as_deref(), Some("worker-b"));
}

#[tokio::test]
async fn late_report_after_reclaim_is_ignored() {
    let (_tmp, pool) = setup().await;
    let timeout = Duration::from_millis(50);
    let a = queue_with(&pool, "worker-a", timeout, 3);
    let b = queue_with(&pool, "worker-b", timeout, 3);
    let c = queue_with(&pool, "worker-c", Duration::from_secs(300), 3);
    let id = a.add_document("report.pdf", "docs", RUN, None).await.unwrap();

    a.claim_next_document(RUN).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    b.claim_next_document(RUN).await.unwrap().unwrap();

    // worker-a lost its claim; none of its reports may touch worker-b's
    assert!(!a.mark_failed(id, "timed out").await.unwrap());
    assert!(!a.mark_completed(id, Some("stale")).await.unwrap());
    assert!(!a.mark_dead_letter(id, "gave up", None).await.unwrap());

    let item = a.get_item(id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Processing);
    assert_eq!(item.claimed_by.as_deref(), Some("worker-b"));
    assert_eq!(item.retry_count, 0);
    assert!(c.claim_next_document(RUN).await.unwrap().is_none());

    assert!(b.mark_completed(id, Some("fresh")).await.unwrap());
    let item = b.get_item(id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(item.content_hash.as_deref(), Some("fresh"));

    let workers = RunCoordinator::new(pool.clone()).list_workers(RUN).await.unwrap();
    let a_row = workers.iter().find(|w| w.worker_id == "worker-a").unwrap();
    let b_row = workers.iter().find(|w| w.worker_id == "worker-b").unwrap();
    assert_eq!(a_row.documents_processed + a_row.documents_failed, 0);
    assert_eq!(b_row.documents_processed, 1);
    assert!(workers.iter().all(|w| w.worker_id != "worker-c"));
}

#[tokio::test]
async fn dead_letter_escalation_clears_worker_document() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    let id = q.add_document("scan.pdf", "pdf", RUN, None).await.unwrap();

    // Only the holder of a processing claim may escalate
    assert!(!q.mark_dead_letter(id, "corrupt", None).await.unwrap());
    q.claim_next_document(RUN).await.unwrap().unwrap();
    assert!(!queue(&pool, "w2").mark_dead_letter(id, "corrupt", None).await.unwrap());

    let details = ErrorDetails::typed("ParseError");
    assert!(q.mark_dead_letter(id, "corrupt xref table", Some(&details)).await.unwrap());

    let item = q.get_item(id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::DeadLetter);
    assert_eq!(item.error_message.as_deref(), Some("corrupt xref table"));
    assert_eq!(item.error_details.as_ref(), Some(&details));

    let workers = RunCoordinator::new(pool.clone()).list_workers(RUN).await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].documents_failed, 1);
    assert_eq!(workers[0].documents_processed, 0);
    assert!(workers[0].current_document.is_none());
}

#[tokio::test]
async fn retries_until_exhausted_then_fails() {
    let (_tmp, pool) = setup().await;
    let q = queue_with(&pool, "w1", Duration::from_secs(300), 3);
    let id = q.add_document("flaky.html", "web", RUN, None).await.unwrap();

    for attempt in 1..=3 {
        let item = q.claim_next_document(RUN).await.unwrap().unwrap();
        assert_eq!(item.queue_id, id);
        assert!(q.mark_failed(id, "connection reset").await.unwrap());

        let item = q.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Retry);
        assert_eq!(item.retry_count, attempt);
    }

    q.claim_next_document(RUN).await.unwrap().unwrap();
    assert!(q.mark_failed(id, "connection reset").await.unwrap());

    let item = q.get_item(id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.retry_count, 3);
    assert_eq!(item.error_message.as_deref(), Some("connection reset"));

    assert!(q.claim_next_document(RUN).await.unwrap().is_none());
}

#[tokio::test]
async fn reports_only_apply_to_processing_items() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    let id = q.add_document("a.md", "docs", RUN, None).await.unwrap();

    // Not claimed yet
    assert!(!q.mark_completed(id, None).await.unwrap());
    assert!(!q.mark_failed(id, "boom").await.unwrap());

    q.claim_next_document(RUN).await.unwrap().unwrap();
    assert!(q.mark_completed(id, Some("sha256:abc")).await.unwrap());

    // Repeated and conflicting reports are no-ops
    assert!(!q.mark_completed(id, Some("sha256:other")).await.unwrap());
    assert!(!q.mark_failed(id, "late failure").await.unwrap());

    let item = q.get_item(id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(item.content_hash.as_deref(), Some("sha256:abc"));
    assert!(item.completed_at.is_some());

    let workers = RunCoordinator::new(pool.clone()).list_workers(RUN).await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].documents_processed, 1);
    assert_eq!(workers[0].documents_failed, 0);
    assert!(workers[0].current_document.is_none());

    assert!(!q.mark_completed(9_999, None).await.unwrap());
}

#[tokio::test]
async fn completion_stats_are_merged_into_metadata() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    let meta = serde_json::json!({ "path": "guide/intro.md" });
    let id = q.add_document("intro", "docs", RUN, Some(&meta)).await.unwrap();

    q.claim_next_document(RUN).await.unwrap().unwrap();
    let stats = ProcessingStats {
        elements_created: 12,
        relationships_created: 4,
        links_discovered: 2,
    };
    assert!(q.mark_completed_with_stats(id, Some("h1"), &stats).await.unwrap());

    let item = q.get_item(id).await.unwrap().unwrap();
    assert_eq!(item.metadata["path"], "guide/intro.md");
    assert_eq!(item.stats(), stats);
}

#[tokio::test]
async fn claim_marks_worker_current_document() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    q.add_document("big.pdf", "docs", RUN, None).await.unwrap();
    q.claim_next_document(RUN).await.unwrap().unwrap();

    let workers = RunCoordinator::new(pool.clone()).list_workers(RUN).await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].worker_id, "w1");
    assert_eq!(workers[0].current_document.as_deref(), Some("big.pdf"));
}

#[tokio::test]
async fn linked_documents_are_queued_and_recorded() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    q.add_document("index.html", "web", RUN, None).await.unwrap();
    let before = q.get_queue_status(RUN).await.unwrap().total;

    assert!(q
        .add_linked_document("index.html", "about.html", "web", RUN, 1)
        .await
        .unwrap());
    assert!(q
        .add_linked_document("index.html", "contact.html", "web", RUN, 1)
        .await
        .unwrap());
    assert!(!q
        .add_linked_document("index.html", "index.html", "web", RUN, 1)
        .await
        .unwrap());

    let status = q.get_queue_status(RUN).await.unwrap();
    assert_eq!(status.total, before + 2);
    assert_eq!(status.pending, 3);

    let children = q.get_children(RUN, "index.html").await.unwrap();
    let names: Vec<&str> = children.iter().map(|c| c.child_doc_id.as_str()).collect();
    assert_eq!(names, vec!["about.html", "contact.html"]);
    assert!(children.iter().all(|c| c.link_depth == 1));

    // Children are ordinary queue items that remember their parent
    q.claim_next_document(RUN).await.unwrap().unwrap();
    let child = q.claim_next_document(RUN).await.unwrap().unwrap();
    assert_eq!(child.doc_id, "about.html");
    assert_eq!(child.parent_doc_id.as_deref(), Some("index.html"));
}

#[tokio::test]
async fn queue_status_counts_every_state() {
    let (_tmp, pool) = setup().await;
    let q = queue_with(&pool, "w1", Duration::from_secs(300), 0);
    enqueue_many(&q, RUN, 4).await;

    let a = q.claim_next_document(RUN).await.unwrap().unwrap();
    q.mark_completed(a.queue_id, None).await.unwrap();
    let b = q.claim_next_document(RUN).await.unwrap().unwrap();
    q.mark_failed(b.queue_id, "invalid markup").await.unwrap();
    q.claim_next_document(RUN).await.unwrap().unwrap();

    let status = q.get_queue_status(RUN).await.unwrap();
    assert_eq!(status.completed, 1);
    assert_eq!(status.failed, 1);
    assert_eq!(status.processing, 1);
    assert_eq!(status.pending, 1);
    assert_eq!(status.retry, 0);
    assert_eq!(status.total, 4);

    let empty = q.get_queue_status("missing-run").await.unwrap();
    assert_eq!(empty.total, 0);
}

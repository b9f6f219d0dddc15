mod common;

use docqueue::dead_letter::DeadLetterQueue;
use docqueue::dlq_processor::DeadLetterProcessor;
use docqueue_core::models::{ErrorDetails, QueueStatus};

use common::{enqueue_many, queue, setup, RUN};

#[tokio::test]
async fn dead_letter_round_trip() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    let dlq = DeadLetterQueue::new(pool.clone());
    let ids = enqueue_many(&q, RUN, 2).await;

    let details = ErrorDetails::typed("ParseError").with_stage("pdf");
    assert!(dlq
        .move_to_dead_letter(ids[0], "corrupt xref table", Some(&details))
        .await
        .unwrap());

    let listed = dlq.list_dead_letter_items(Some(RUN), 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].queue_id, ids[0]);
    assert_eq!(listed[0].error_message.as_deref(), Some("corrupt xref table"));
    assert_eq!(listed[0].error_details.as_ref(), Some(&details));

    // The quarantined item is never handed out
    let claimed = q.claim_next_document(RUN).await.unwrap().unwrap();
    assert_eq!(claimed.queue_id, ids[1]);
    assert!(q.claim_next_document(RUN).await.unwrap().is_none());

    assert!(dlq.retry_from_dead_letter(ids[0]).await.unwrap());
    assert!(dlq.list_dead_letter_items(Some(RUN), 10).await.unwrap().is_empty());

    let again = q.claim_next_document(RUN).await.unwrap().unwrap();
    assert_eq!(again.queue_id, ids[0]);
    assert_eq!(again.claimed_by.as_deref(), Some("w1"));
}

#[tokio::test]
async fn requeue_keeps_retry_history() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    let dlq = DeadLetterQueue::new(pool.clone());
    let id = q.add_document("a", "docs", RUN, None).await.unwrap();

    q.claim_next_document(RUN).await.unwrap().unwrap();
    q.mark_failed(id, "timed out").await.unwrap();
    q.claim_next_document(RUN).await.unwrap().unwrap();
    dlq.move_to_dead_letter(id, "gave up", None).await.unwrap();
    dlq.retry_from_dead_letter(id).await.unwrap();

    let item = q.get_item(id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retry_count, 1);
    assert!(item.claimed_by.is_none());
    assert!(item.claimed_at.is_none());
    assert_eq!(item.error_message.as_deref(), Some("gave up"));
}

#[tokio::test]
async fn move_is_unconditional_but_retry_is_not() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    let dlq = DeadLetterQueue::new(pool.clone());
    let id = q.add_document("a", "docs", RUN, None).await.unwrap();

    assert!(!dlq.retry_from_dead_letter(id).await.unwrap());
    assert!(!dlq.move_to_dead_letter(424_242, "missing", None).await.unwrap());

    q.claim_next_document(RUN).await.unwrap().unwrap();
    q.mark_completed(id, None).await.unwrap();
    assert!(dlq.move_to_dead_letter(id, "bad output", None).await.unwrap());
    assert_eq!(
        q.get_item(id).await.unwrap().unwrap().status,
        QueueStatus::DeadLetter
    );
}

#[tokio::test]
async fn bulk_requeue_and_counts() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    let dlq = DeadLetterQueue::new(pool.clone());
    let ids = enqueue_many(&q, RUN, 3).await;
    let other = q.add_document("x", "docs", "other-run", None).await.unwrap();

    for id in &ids {
        dlq.move_to_dead_letter(*id, "unsupported format", None).await.unwrap();
    }
    dlq.move_to_dead_letter(other, "unsupported format", None).await.unwrap();

    assert_eq!(dlq.count_dead_letter_items(Some(RUN)).await.unwrap(), 3);
    assert_eq!(dlq.count_dead_letter_items(None).await.unwrap(), 4);
    assert_eq!(dlq.list_dead_letter_items(None, 2).await.unwrap().len(), 2);

    assert_eq!(dlq.retry_all_from_dead_letter(RUN).await.unwrap(), 3);
    assert_eq!(dlq.count_dead_letter_items(Some(RUN)).await.unwrap(), 0);
    assert_eq!(dlq.count_dead_letter_items(None).await.unwrap(), 1);
    assert_eq!(q.get_queue_status(RUN).await.unwrap().pending, 3);
}

#[tokio::test]
async fn failure_patterns_group_by_error_type() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    let dlq = DeadLetterQueue::new(pool.clone());

    let failures = [
        ("a.pdf", "pdf", "Failed to parse PDF trailer", None),
        ("b.pdf", "pdf", "Syntax error at offset 120", None),
        ("c.docx", "office", "malformed zip archive", None),
        ("d.md", "wiki", "Permission denied", None),
        (
            "e.md",
            "wiki",
            "worker crashed",
            Some(ErrorDetails::typed("ParseError")),
        ),
        ("f.md", "wiki", "something odd", None),
    ];
    for (doc, source, message, details) in &failures {
        let id = q.add_document(doc, source, RUN, None).await.unwrap();
        dlq.move_to_dead_letter(id, message, details.as_ref())
            .await
            .unwrap();
    }

    let patterns = DeadLetterProcessor::new(pool.clone())
        .analyze_failure_patterns(RUN)
        .await
        .unwrap();

    assert_eq!(patterns.len(), 3);
    assert_eq!(patterns[0].error_type, "ParseError");
    assert_eq!(patterns[0].frequency, 4);
    assert!((patterns[0].percentage - 66.666).abs() < 0.01);
    assert_eq!(
        patterns[0].affected_sources,
        vec!["office".to_string(), "pdf".to_string(), "wiki".to_string()]
    );
    assert!(patterns[1..].iter().all(|p| p.frequency == 1));
    let rest: Vec<&str> = patterns[1..].iter().map(|p| p.error_type.as_str()).collect();
    assert_eq!(rest, vec!["PermissionError", "UnknownError"]);
}

#[tokio::test]
async fn summary_counts_per_source() {
    let (_tmp, pool) = setup().await;
    let q = queue(&pool, "w1");
    let dlq = DeadLetterQueue::new(pool.clone());
    let processor = DeadLetterProcessor::new(pool.clone());

    let empty = processor.get_dead_letter_summary(RUN).await.unwrap();
    assert_eq!(empty.total, 0);
    assert!(empty.oldest.is_none());

    for (doc, source) in [("a", "pdf"), ("b", "pdf"), ("c", "web")] {
        let id = q.add_document(doc, source, RUN, None).await.unwrap();
        dlq.move_to_dead_letter(id, "corrupt", None).await.unwrap();
    }

    let summary = processor.get_dead_letter_summary(RUN).await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.by_source.get("pdf"), Some(&2));
    assert_eq!(summary.by_source.get("web"), Some(&1));
    assert!(summary.oldest.unwrap() <= summary.newest.unwrap());
}

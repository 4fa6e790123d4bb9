// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn key(name: &str) -> Arc<str> {
    Arc::from(name)
}

/// Drain everything currently poppable.
fn drain(q: &OutboundQueue<&'static str>) -> Vec<Popped<&'static str>> {
    let mut out = Vec::new();
    while let Some(p) = q.try_pop() {
        out.push(p);
    }
    out
}

#[test]
fn fifo_below_high_water() {
    let q = OutboundQueue::new(100, 50);
    let k = key("sub-1");
    assert!(q.push_data(&k, "a", 10));
    assert!(q.push_control("b"));
    assert!(q.push_data(&k, "c", 10));

    assert_eq!(
        drain(&q),
        vec![Popped::Item("a"), Popped::Item("b"), Popped::Item("c")]
    );
    assert!(!q.is_lagging());
}

#[test]
fn crossing_high_water_drops_oldest_and_plants_gap() {
    let q = OutboundQueue::new(100, 20);
    let k = key("sub-1");
    q.push_data(&k, "a", 60);
    q.push_data(&k, "b", 60); // 120 > 100: "a" dropped, gap planted in front

    assert!(q.is_lagging());
    assert_eq!(q.queued_bytes(), 60);

    match q.try_pop() {
        Some(Popped::Gap { key: gk, missed }) => {
            assert_eq!(&*gk, "sub-1");
            assert_eq!(missed, 60);
        }
        other => assert!(false, "expected gap, got {other:?}"),
    }
    assert_eq!(q.try_pop(), Some(Popped::Item("b")));
}

#[test]
fn gap_accumulates_until_delivered() {
    let q = OutboundQueue::new(100, 20);
    let k = key("sub-1");
    q.push_data(&k, "a", 60);
    q.push_data(&k, "b", 60); // drops a (60 missed)
    q.push_data(&k, "c", 60); // drops b into the same still-queued marker

    match q.try_pop() {
        Some(Popped::Gap { missed, .. }) => assert_eq!(missed, 120),
        other => assert!(false, "expected gap, got {other:?}"),
    }
    assert_eq!(q.try_pop(), Some(Popped::Item("c")));
}

#[test]
fn lagging_clears_below_low_water() {
    let q = OutboundQueue::new(100, 20);
    let k = key("sub-1");
    q.push_data(&k, "a", 60);
    q.push_data(&k, "b", 60);
    assert!(q.is_lagging());

    let _ = q.try_pop(); // gap
    let _ = q.try_pop(); // b; queue empties below low water
    assert!(!q.is_lagging());

    // A fresh burst opens a new episode with its own marker.
    q.push_data(&k, "c", 80);
    q.push_data(&k, "d", 80);
    match q.try_pop() {
        Some(Popped::Gap { missed, .. }) => assert_eq!(missed, 80),
        other => assert!(false, "expected new gap, got {other:?}"),
    }
}

#[test]
fn drops_attributed_per_stream() {
    let q = OutboundQueue::new(100, 20);
    let k1 = key("sub-1");
    let k2 = key("sub-2");
    q.push_data(&k1, "a1", 40);
    q.push_data(&k2, "b1", 40);
    q.push_data(&k1, "a2", 40); // 120 > 100: a1 (sub-1) dropped
    q.push_data(&k2, "b2", 40); // b1 (sub-2) dropped

    let popped = drain(&q);
    let gaps: Vec<(String, u64)> = popped
        .iter()
        .filter_map(|p| match p {
            Popped::Gap { key, missed } => Some((key.to_string(), *missed)),
            Popped::Item(_) => None,
        })
        .collect();
    assert_eq!(gaps, vec![("sub-1".to_owned(), 40), ("sub-2".to_owned(), 40)]);
}

#[test]
fn control_entries_survive_data_eviction() {
    let q = OutboundQueue::new(100, 20);
    let k = key("sub-1");
    q.push_control("structural");
    q.push_data(&k, "a", 80);
    q.push_data(&k, "b", 80); // a dropped, structural kept

    let popped = drain(&q);
    assert_eq!(popped[0], Popped::Item("structural"));
    assert!(matches!(popped[1], Popped::Gap { .. }));
    assert_eq!(popped[2], Popped::Item("b"));
}

#[test]
fn coalesce_replaces_only_while_lagging() {
    let q = OutboundQueue::new(100, 20);
    let k = key("sub-1");

    // Not lagging: both kept.
    q.push_coalesce("task", "t1");
    q.push_coalesce("task", "t2");

    // Force lagging.
    q.push_data(&k, "a", 80);
    q.push_data(&k, "b", 80);
    assert!(q.is_lagging());

    // Lagging: replaces the newest queued entry with the same key.
    q.push_coalesce("task", "t3");

    let items: Vec<&str> = drain(&q)
        .into_iter()
        .filter_map(|p| match p {
            Popped::Item(i) => Some(i),
            Popped::Gap { .. } => None,
        })
        .collect();
    assert_eq!(items, vec!["t1", "t3", "b"]);
}

#[test]
fn close_refuses_pushes_but_drains() {
    let q = OutboundQueue::new(100, 20);
    let k = key("sub-1");
    q.push_data(&k, "a", 10);
    q.close();
    assert!(!q.push_data(&k, "b", 10));
    assert!(!q.push_control("c"));
    assert_eq!(q.try_pop(), Some(Popped::Item("a")));
    assert_eq!(q.try_pop(), None);
}

#[test]
fn control_flood_closes_queue() {
    let q: OutboundQueue<u64> = OutboundQueue::new(100, 20);
    for i in 0..(CONTROL_LIMIT as u64) {
        assert!(q.push_control(i));
    }
    assert!(!q.push_control(99_999));
    assert!(q.is_closed());
}

#[tokio::test]
async fn pop_wakes_on_push() {
    let q = Arc::new(OutboundQueue::new(100, 20));
    let k = key("sub-1");

    let waiter = {
        let q = Arc::clone(&q);
        tokio::spawn(async move { q.pop().await })
    };
    tokio::task::yield_now().await;
    q.push_data(&k, "late", 4);

    let got = tokio::time::timeout(std::time::Duration::from_secs(5), waiter).await;
    match got {
        Ok(Ok(Some(Popped::Item(item)))) => assert_eq!(item, "late"),
        other => assert!(false, "unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn pop_returns_none_after_close() {
    let q: Arc<OutboundQueue<&'static str>> = Arc::new(OutboundQueue::new(100, 20));
    let waiter = {
        let q = Arc::clone(&q);
        tokio::spawn(async move { q.pop().await })
    };
    tokio::task::yield_now().await;
    q.close();

    let got = tokio::time::timeout(std::time::Duration::from_secs(5), waiter).await;
    match got {
        Ok(Ok(None)) => {}
        other => assert!(false, "unexpected: {other:?}"),
    }
}

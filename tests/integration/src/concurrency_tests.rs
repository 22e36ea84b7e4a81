//! Concurrent commands on one area or marker serialize through the locks

use crate::test_utils::*;
use geomark_commands::{Command, Outcome, Register, Vote};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_at_same_spot() {
    let node = TestNode::new();

    let mut tasks = Vec::new();
    for name in ["A", "B"] {
        let ctx = node.context.clone();
        tasks.push(tokio::spawn(async move {
            ctx.execute(Command::Register(Register {
                longitude: LON,
                latitude: LAT,
                actor: actor(name),
            }))
            .await
        }));
    }

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().expect("registration"));
    }

    let registered: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::Registered { .. }))
        .collect();
    let voted: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::Voted { .. }))
        .collect();
    assert_eq!(registered.len(), 1);
    assert_eq!(voted.len(), 1);

    let id = registered[0].marker_id().unwrap();
    assert_eq!(voted[0].marker_id(), Some(id));

    let nearby = node
        .context
        .markers_near(&geomark_core::Coordinate::new(LON, LAT).unwrap(), 50.0)
        .unwrap();
    assert_eq!(nearby.len(), 1);
    assert_eq!(nearby[0].document.version, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_across_cell_edge() {
    let node = TestNode::new();

    // About 2m apart, on either side of a geohash cell boundary
    let spots = [("A", 49.00931), ("B", 49.00933)];
    let mut tasks = Vec::new();
    for (name, latitude) in spots {
        let ctx = node.context.clone();
        tasks.push(tokio::spawn(async move {
            ctx.execute(Command::Register(Register {
                longitude: LON,
                latitude,
                actor: actor(name),
            }))
            .await
        }));
    }

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().expect("registration"));
    }
    let registered = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::Registered { .. }))
        .count();
    assert_eq!(registered, 1);

    let nearby = node
        .context
        .markers_near(&geomark_core::Coordinate::new(LON, 49.00932).unwrap(), 50.0)
        .unwrap();
    assert_eq!(nearby.len(), 1);
    assert_eq!(nearby[0].document.version, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_votes_all_land() {
    let node = TestNode::new();
    let id = registered_id(
        &node
            .context
            .execute(Command::Register(Register {
                longitude: LON,
                latitude: LAT,
                actor: actor("creator"),
            }))
            .await
            .unwrap(),
    );

    let voters: u64 = 3;
    let mut tasks = Vec::new();
    for i in 0..voters {
        let ctx = node.context.clone();
        tasks.push(tokio::spawn(async move {
            ctx.execute(Command::Upvote(Vote {
                marker_id: id,
                longitude: LON,
                latitude: LAT,
                actor: actor(&format!("voter-{}", i)),
            }))
            .await
        }));
    }
    for task in tasks {
        let outcome = task.await.unwrap().expect("vote");
        assert!(matches!(outcome, Outcome::Voted { .. }));
    }

    let marker = node.context.repository().load(id).unwrap().unwrap();
    assert_eq!(marker.version(), 1 + voters);
    assert_eq!(
        node.context.repository().votes().count_for_marker(id).unwrap(),
        voters
    );
}

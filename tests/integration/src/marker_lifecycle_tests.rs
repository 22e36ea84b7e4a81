//! Register, vote, remove and restore against file-backed stores

use crate::test_utils::*;
use geomark_commands::{Command, Outcome, Register, Vote};
use geomark_credibility::Behaviour;
use geomark_store::TILES_TOPIC;

#[tokio::test]
async fn test_register_upvote_remove_flow() {
    let node = TestNode::new();
    let ctx = &node.context;

    let outcome = ctx
        .execute(Command::Register(Register {
            longitude: LON,
            latitude: LAT,
            actor: actor("A"),
        }))
        .await
        .expect("register");
    let id = registered_id(&outcome);

    let doc = ctx.marker(id).unwrap().expect("document after register");
    assert_eq!(doc.version, 1);
    assert_eq!(doc.score, 0);

    let now = ctx.now_ms();
    ctx.credibility()
        .seed(&actor("B"), 80, Behaviour::new(now), now)
        .unwrap();

    // ~28m north of the marker, within reach
    let outcome = ctx
        .execute(Command::Upvote(Vote {
            marker_id: id,
            longitude: LON,
            latitude: 49.00945,
            actor: actor("B"),
        }))
        .await
        .expect("upvote");
    assert_eq!(
        outcome,
        Outcome::Voted {
            marker_id: id,
            delta: 4,
            score: 4
        }
    );
    let doc = ctx.marker(id).unwrap().unwrap();
    assert_eq!(doc.version, 2);
    assert_eq!(doc.score, 4);

    let outcome = ctx
        .execute(Command::Remove { marker_id: id })
        .await
        .expect("remove");
    assert_eq!(outcome, Outcome::Removed { marker_id: id });

    assert!(ctx.marker(id).unwrap().is_none());
    assert_eq!(
        ctx.repository().events().count(&id.to_string()).unwrap(),
        3
    );

    // One tile message per committed event
    assert_eq!(node.queue.on_topic(TILES_TOPIC).len(), 3);
}

#[tokio::test]
async fn test_snapshot_boundary_keeps_read_model_in_step() {
    let node = TestNode::new();
    let id = registered_id(
        &node
            .context
            .execute(Command::Register(Register {
                longitude: LON,
                latitude: LAT,
                actor: actor("A"),
            }))
            .await
            .unwrap(),
    );

    // Push the stream past a snapshot boundary
    for i in 0..6 {
        node.clock.advance_secs(25 * 3600);
        node.context
            .execute(Command::Upvote(Vote {
                marker_id: id,
                longitude: LON,
                latitude: LAT,
                actor: actor(&format!("voter-{}", i)),
            }))
            .await
            .unwrap();
    }

    let marker = node.context.repository().load(id).unwrap().unwrap();
    assert_eq!(marker.version(), 7);
    assert!(node
        .context
        .repository()
        .snapshots()
        .get(&id.to_string())
        .unwrap()
        .is_some());

    let doc = node.context.marker(id).unwrap().unwrap();
    assert_eq!(doc.version, 7);
    assert_eq!(doc.score, marker.score());
}

#[tokio::test]
async fn test_public_errors_hide_internals() {
    let node = TestNode::new();
    let err = node
        .context
        .execute(Command::Remove {
            marker_id: geomark_domain::MarkerId::new(),
        })
        .await
        .unwrap_err();
    let public = err.to_public();
    assert_eq!(public.code, "NOT_FOUND");

    let json = serde_json::to_value(&public).unwrap();
    assert!(json.get("code").is_some());
    assert!(json.get("message").is_some());
}

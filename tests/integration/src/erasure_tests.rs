//! Right-to-erasure across every store that references an actor

use crate::test_utils::*;
use geomark_commands::{Command, Outcome, Register, Report, Vote};
use geomark_domain::ReportCategory;

#[tokio::test]
async fn test_erasure_keeps_history_but_forgets_actor() {
    let node = TestNode::new();
    let ctx = &node.context;

    let id = registered_id(
        &ctx.execute(Command::Register(Register {
            longitude: LON,
            latitude: LAT,
            actor: actor("A"),
        }))
        .await
        .unwrap(),
    );
    ctx.execute(Command::Upvote(Vote {
        marker_id: id,
        longitude: LON,
        latitude: LAT,
        actor: actor("B"),
    }))
    .await
    .unwrap();
    ctx.execute(Command::Report(Report {
        marker_id: id,
        longitude: LON,
        latitude: LAT,
        actor: actor("B"),
        category: ReportCategory::Misplaced,
    }))
    .await
    .unwrap();

    let before = ctx.repository().events().raw_payloads(&id.to_string()).unwrap();

    let outcome = ctx
        .execute(Command::Erase { actor: actor("B") })
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Erased {
            tokens_deleted: 2,
            votes_deleted: 1,
            credibility_deleted: true
        }
    );

    // Stored events are byte-for-byte unchanged
    let after = ctx.repository().events().raw_payloads(&id.to_string()).unwrap();
    assert_eq!(before, after);
    for payload in &after {
        assert!(!payload.contains("\"B\""));
    }

    // Replay still works and B's report now counts as an anonymous reporter
    let marker = ctx.repository().load(id).unwrap().unwrap();
    assert_eq!(marker.version(), 3);
    assert_eq!(marker.distinct_reporters(ReportCategory::Misplaced), 1);

    // A is untouched
    let outcome = ctx
        .execute(Command::Erase { actor: actor("A") })
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Erased { tokens_deleted: 1, .. }));
}

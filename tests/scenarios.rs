use std::sync::Arc;
use std::thread;
use std::time::Duration;

use glowfeed::clock::{Clock, ManualClock};
use glowfeed::data::{MemoryStore, StaticAuth, StoreOp};
use glowfeed::error::CODE_CHECK;
use glowfeed::model::{NewComment, NewPost, PostId, TargetKey};
use glowfeed::threads::assemble;
use glowfeed::{
    Cooldowns, Created, FeedError, FeedLoader, StoreError, Submission, SubmissionCoordinator,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    coordinator: Arc<SubmissionCoordinator>,
    post_id: PostId,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::at_epoch());
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let auth = Arc::new(StaticAuth::signed_in("ava"));
    let post = store.seed_post(NewPost {
        author_id: "ava".into(),
        body: "P1".into(),
        image_url: None,
    });
    let coordinator = Arc::new(SubmissionCoordinator::new(
        store.clone(),
        auth,
        clock.clone(),
        Cooldowns {
            comment: Duration::from_secs(8),
            reply: Duration::from_secs(5),
        },
    ));
    Harness {
        clock,
        store,
        coordinator,
        post_id: post.id,
    }
}

#[test]
fn scenario_a_reply_threads_under_comment() {
    let h = harness();
    let c1 = h
        .store
        .seed_comment(NewComment {
            post_id: h.post_id.clone(),
            author_id: "bo".into(),
            body: "C1".into(),
            parent_id: None,
        })
        .unwrap();
    h.clock.advance(Duration::from_secs(5));
    let r1 = h
        .store
        .seed_comment(NewComment {
            post_id: h.post_id.clone(),
            author_id: "ava".into(),
            body: "R1".into(),
            parent_id: Some(c1.id.clone()),
        })
        .unwrap();

    let snapshot = FeedLoader::new(h.store.clone())
        .load(Some(&"ava".into()))
        .unwrap();
    let thread = snapshot.thread(&h.post_id);
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].comment.id, c1.id);
    assert_eq!(thread[0].replies.len(), 1);
    assert_eq!(thread[0].replies[0].id, r1.id);
}

#[test]
fn scenario_b_cooldown_counts_down_then_allows() {
    let h = harness();
    assert!(matches!(
        h.coordinator.submit_comment(&h.post_id, "first"),
        Ok(Submission::Created(_))
    ));

    h.clock.advance(Duration::from_secs(3));
    assert_eq!(
        h.coordinator.submit_comment(&h.post_id, "second"),
        Err(FeedError::CooldownActive {
            remaining: Duration::from_millis(5_000)
        })
    );

    h.clock.advance(Duration::from_secs(5));
    assert!(matches!(
        h.coordinator.submit_comment(&h.post_id, "second"),
        Ok(Submission::Created(_))
    ));
    assert_eq!(h.store.calls().insert_comment, 2);
}

#[test]
fn scenario_c_over_long_comment_never_reaches_store() {
    let h = harness();
    let result = h.coordinator.submit_comment(&h.post_id, &"a".repeat(600));
    assert!(matches!(result, Err(FeedError::Validation(_))));
    assert_eq!(h.store.calls().inserts(), 0);
}

#[test]
fn scenario_d_store_failure_leaves_cooldown_unused() {
    let h = harness();
    h.store
        .fail_next(StoreOp::InsertComment, StoreError::new("network unreachable"));
    match h.coordinator.submit_comment(&h.post_id, "hello") {
        Err(FeedError::Store(err)) => assert_eq!(err.message, "network unreachable"),
        other => panic!("unexpected {other:?}"),
    }

    h.clock.advance(Duration::from_secs(1));
    assert!(matches!(
        h.coordinator.submit_comment(&h.post_id, "hello"),
        Ok(Submission::Created(_))
    ));
}

#[test]
fn remaining_time_strictly_decreases_to_the_boundary() {
    let h = harness();
    h.coordinator.submit_comment(&h.post_id, "go").unwrap();
    let key = TargetKey::Comment(h.post_id.clone());

    let mut last = Duration::MAX;
    for _ in 0..7 {
        h.clock.advance(Duration::from_secs(1));
        match h.coordinator.submit_comment(&h.post_id, "again") {
            Err(FeedError::CooldownActive { remaining }) => {
                assert!(remaining < last);
                last = remaining;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(last, Duration::from_secs(1));
    h.clock.advance(Duration::from_secs(1));
    assert!(h
        .coordinator
        .limiter()
        .check(&key, h.clock.now(), Duration::from_secs(8))
        .is_allowed());
}

#[test]
fn boundary_lengths() {
    let h = harness();
    assert!(h.coordinator.submit_post(&"a".repeat(500)).is_ok());
    assert!(matches!(
        h.coordinator.submit_post(&"a".repeat(501)),
        Err(FeedError::Validation(_))
    ));
    assert!(matches!(
        h.coordinator.submit_post("   \n "),
        Err(FeedError::Validation(_))
    ));
    assert!(h.coordinator.submit_post("a").is_ok());
}

#[test]
fn second_submit_while_in_flight_is_ignored() {
    let h = harness();
    let gate = h.store.gate_next(StoreOp::InsertComment);

    let coordinator = h.coordinator.clone();
    let post_id = h.post_id.clone();
    let first = thread::spawn(move || coordinator.submit_comment(&post_id, "double"));
    assert!(gate.wait_entered(WAIT));

    assert_eq!(
        h.coordinator.submit_comment(&h.post_id, "double"),
        Ok(Submission::Ignored)
    );
    gate.release();

    let first = first.join().unwrap();
    assert!(matches!(first, Ok(Submission::Created(Created::Comment(_)))));
    assert_eq!(h.store.calls().insert_comment, 1);
    assert_eq!(h.store.comment_count(), 1);
}

#[test]
fn assembly_never_duplicates_or_crosses_posts() {
    let h = harness();
    let other = h.store.seed_post(NewPost {
        author_id: "bo".into(),
        body: "P2".into(),
        image_url: None,
    });
    let c1 = h
        .store
        .seed_comment(NewComment {
            post_id: h.post_id.clone(),
            author_id: "bo".into(),
            body: "C1".into(),
            parent_id: None,
        })
        .unwrap();
    let stray = h.store.seed_comment(NewComment {
        post_id: other.id.clone(),
        author_id: "bo".into(),
        body: "stray".into(),
        parent_id: Some(c1.id.clone()),
    });
    assert_eq!(
        stray.unwrap_err().code.as_deref(),
        Some(CODE_CHECK)
    );
    for n in 0..3 {
        h.clock.advance(Duration::from_secs(1));
        h.store
            .seed_comment(NewComment {
                post_id: h.post_id.clone(),
                author_id: "ava".into(),
                body: format!("reply {n}"),
                parent_id: Some(c1.id.clone()),
            })
            .unwrap();
    }

    let loader = FeedLoader::new(h.store.clone());
    let snapshot = loader.load(Some(&"ava".into())).unwrap();
    let again = loader.load(Some(&"ava".into())).unwrap();
    assert_eq!(snapshot, again);

    let replies = &snapshot.thread(&h.post_id)[0].replies;
    assert_eq!(replies.len(), 3);
    assert!(replies.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert!(snapshot.thread(&other.id).is_empty());

    let assembly = assemble(&snapshot.posts, &[]);
    assert_eq!(assembly.dropped, 0);
}

#[test]
fn reply_to_a_reply_is_refused_and_leaves_the_thread_intact() {
    let h = harness();
    let Ok(Submission::Created(Created::Comment(c1))) =
        h.coordinator.submit_comment(&h.post_id, "C1")
    else {
        panic!("expected a comment");
    };
    let Ok(Submission::Created(Created::Comment(r1))) =
        h.coordinator.submit_reply(&c1.id, &h.post_id, "R1")
    else {
        panic!("expected a reply");
    };

    let err = h
        .coordinator
        .submit_reply(&r1.id, &h.post_id, "R2")
        .unwrap_err();
    assert!(matches!(&err, FeedError::Store(e) if e.code.as_deref() == Some(CODE_CHECK)));
    assert!(h
        .coordinator
        .limiter()
        .check(&TargetKey::Reply(r1.id.clone()), h.clock.now(), Duration::from_secs(5))
        .is_allowed());

    let snapshot = FeedLoader::new(h.store.clone())
        .load(Some(&"ava".into()))
        .unwrap();
    assert_eq!(h.store.comment_count(), snapshot.comment_count());
    let thread = snapshot.thread(&h.post_id);
    assert_eq!(thread[0].replies.len(), 1);
    assert_eq!(thread[0].replies[0].id, r1.id);
}

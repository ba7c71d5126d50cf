//! Name validation edge cases, exercised through the public `open`/`unlink`
//! entry points rather than the internal `validate` helper.

use std::io::ErrorKind;

use rtmq::{unlink, MessageQueue, OpenOptions};

#[test]
fn bare_name_gets_a_leading_slash_prepended() {
    let _ = unlink("/prepended");
    let mq = MessageQueue::create("prepended").unwrap();
    // the same queue is reachable whether or not the caller included the slash
    let same = MessageQueue::open("/prepended").unwrap();
    mq.send(0, b"x").unwrap();
    let mut buf = [0; 8192];
    same.receive(&mut buf).unwrap();
    unlink("prepended").unwrap();
}

#[test]
fn rejects_interior_slash() {
    let err = MessageQueue::create("/a/b").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn rejects_empty_name() {
    let err = MessageQueue::create("").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let err = MessageQueue::create("/").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn distinct_names_are_independent_queues() {
    let _ = unlink("/distinct_a");
    let _ = unlink("/distinct_b");
    let a = MessageQueue::create("/distinct_a").unwrap();
    let b = MessageQueue::create("/distinct_b").unwrap();
    a.send(0, b"for a").unwrap();
    assert_eq!(b.attributes().current_messages, 0);
    unlink("/distinct_a").unwrap();
    unlink("/distinct_b").unwrap();
}

#[test]
fn unlink_rejects_malformed_name_before_checking_existence() {
    let err = unlink("/bad/name").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn long_names_are_accepted() {
    let long = format!("/{}", "q".repeat(200));
    let _ = unlink(&long);
    let mq = OpenOptions::readwrite().create().open(&long).unwrap();
    mq.send(0, b"ok").unwrap();
    unlink(&long).unwrap();
}

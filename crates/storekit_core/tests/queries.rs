mod common;

use common::{ephemeral_manager, widget, Gadget, Widget};
use storekit_core::{all_query, Filter, SortKey};

fn names(records: Vec<storekit_core::Record<Widget>>) -> Vec<String> {
    records
        .into_iter()
        .map(|record| record.into_inner().name)
        .collect()
}

#[test]
fn unordered_fetch_lists_persisted_records_before_pending_ones() {
    let manager = ephemeral_manager();
    let session = manager.interactive();
    let repo = session.repository::<Widget>().unwrap();

    repo.insert_with(widget("first", 3)).unwrap();
    repo.insert_with(widget("second", 1)).unwrap();
    repo.save();
    repo.insert_with(widget("third", 2)).unwrap();

    assert_eq!(
        names(repo.fetch_all().unwrap()),
        vec!["first", "second", "third"]
    );
}

#[test]
fn ordering_spans_persisted_and_pending_records() {
    let manager = ephemeral_manager();
    let session = manager.interactive();
    let repo = session.repository::<Widget>().unwrap();

    repo.insert_with(widget("b", 2)).unwrap();
    repo.insert_with(widget("d", 4)).unwrap();
    repo.save();
    repo.insert_with(widget("a", 1)).unwrap();
    repo.insert_with(widget("c", 3)).unwrap();

    let descending = repo
        .try_fetch(|ty| ty.all_query().order_by(SortKey::desc("rank")))
        .unwrap();
    assert_eq!(names(descending), vec!["d", "c", "b", "a"]);

    let top_two = repo
        .try_fetch(|ty| ty.all_query().order_by(SortKey::asc("name")).limit(2))
        .unwrap();
    assert_eq!(names(top_two), vec!["a", "b"]);
}

#[test]
fn filters_match_the_same_records_before_and_after_save() {
    let manager = ephemeral_manager();
    let session = manager.interactive();
    let repo = session.repository::<Widget>().unwrap();

    for (name, rank) in [("alpha", 1), ("beta", 5), ("gamma", 9), ("alphabet", 12)] {
        repo.insert_with(widget(name, rank)).unwrap();
    }

    let query = all_query::<Widget>()
        .filter(Filter::contains("name", "alpha").or(Filter::ge("rank", 9)))
        .filter(Filter::eq("name", "gamma").negate())
        .order_by(SortKey::asc("rank"));

    let before = names(repo.try_fetch_query(&query).unwrap());
    let count_before = repo.try_count(&query).unwrap();
    assert!(repo.save());
    let after = names(repo.try_fetch_query(&query).unwrap());
    let count_after = repo.try_count(&query).unwrap();

    assert_eq!(before, vec!["alpha", "alphabet"]);
    assert_eq!(before, after);
    assert_eq!(count_before, 2);
    assert_eq!(count_after, 2);
}

#[test]
fn count_respects_limit() {
    let manager = ephemeral_manager();
    let session = manager.interactive();
    let repo = session.repository::<Widget>().unwrap();
    for rank in 0..5 {
        repo.insert_with(widget("w", rank)).unwrap();
    }

    let limited = all_query::<Widget>().limit(3);
    assert_eq!(repo.count(&limited), 3);
    repo.save();
    assert_eq!(repo.count(&limited), 3);
    assert_eq!(repo.count(&all_query::<Widget>().limit(10)), 5);
}

#[test]
fn fetch_by_id_sees_pending_and_persisted_records() {
    let manager = ephemeral_manager();
    let session = manager.interactive();
    let repo = session.repository::<Widget>().unwrap();

    let pending = repo.insert_with(widget("pending", 1)).unwrap();
    assert_eq!(
        repo.fetch_by_id(pending.id()).unwrap().unwrap().name,
        "pending"
    );

    repo.save();
    let reader = manager.background();
    let other = reader.repository::<Widget>().unwrap();
    assert_eq!(
        other.fetch_by_id(pending.id()).unwrap().unwrap().name,
        "pending"
    );
    assert!(other.fetch_by_id(uuid::Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn raw_session_queries_expose_payloads() {
    let manager = ephemeral_manager();
    let session = manager.interactive();
    let repo = session.repository::<Widget>().unwrap();
    let record = repo.insert_with(widget("raw", 7)).unwrap();

    let raw = session
        .execute_query(&all_query::<Widget>().filter(Filter::eq("rank", 7)))
        .unwrap();
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].object_id, record.id());
    assert_eq!(raw[0].payload["name"], "raw");
    assert_eq!(session.execute_count(&all_query::<Widget>()).unwrap(), 1);
}

#[test]
fn fetch_by_id_only_finds_records_of_its_own_entity() {
    let manager = ephemeral_manager();
    let session = manager.interactive();
    let widgets = session.repository::<Widget>().unwrap();
    let gadgets = session.repository::<Gadget>().unwrap();

    let gadget = gadgets
        .insert_with(|mut gadget| {
            gadget.label = "g".to_string();
            gadget
        })
        .unwrap();
    assert!(widgets.fetch_by_id(gadget.id()).unwrap().is_none());

    assert!(session.attempt_to_save());
    assert!(widgets.fetch_by_id(gadget.id()).unwrap().is_none());

    gadgets.delete(&gadget);
    assert!(gadgets.fetch_by_id(gadget.id()).unwrap().is_none());
    assert!(widgets.fetch_by_id(gadget.id()).unwrap().is_none());
}

//! End-to-end teardown of operator chains: cascading `terminate`, branch
//! disposal through `Pipeline`, and release-on-drop.

use std::cell::RefCell;
use std::rc::Rc;

use patchwire_reactive::{Pipeline, Stream, Subscription, named_combine_latest};

fn record<T: Clone + 'static>(stream: &Stream<T>) -> (Rc<RefCell<Vec<T>>>, Subscription) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let sub = stream.subscribe(move |v, _| seen_clone.borrow_mut().push(v.clone()));
    (seen, sub)
}

/// `A -> B -> C` with a recorder on every node.
struct Chain {
    a: Stream<i32>,
    b: Stream<i32>,
    c: Stream<i32>,
    logs: Vec<Rc<RefCell<Vec<i32>>>>,
    _subs: Vec<Subscription>,
}

fn chain() -> Chain {
    let a = Stream::named("a");
    let b = a.map(|v: &i32| v + 1);
    let c = b.filter(|v: &i32| v % 2 == 0);
    let mut logs = Vec::new();
    let mut subs = Vec::new();
    for stream in [&a, &b, &c] {
        let (log, sub) = record(stream);
        logs.push(log);
        subs.push(sub);
    }
    Chain {
        a,
        b,
        c,
        logs,
        _subs: subs,
    }
}

fn nothing_reachable(chain: &Chain) -> bool {
    chain.logs.iter().all(|log| log.borrow().is_empty())
}

#[test]
fn chain_delivers_before_teardown() {
    let chain = chain();
    chain.a.emit_value(1).unwrap();
    assert_eq!(*chain.logs[0].borrow(), vec![1]);
    assert_eq!(*chain.logs[1].borrow(), vec![2]);
    assert_eq!(*chain.logs[2].borrow(), vec![2]);
}

#[test]
fn terminate_on_any_node_leaves_nothing_reachable_from_root() {
    for pick in 0..3 {
        let chain = chain();
        let node = [&chain.a, &chain.b, &chain.c][pick].clone();
        node.terminate();
        chain.a.emit_value(1).unwrap();
        assert!(nothing_reachable(&chain), "terminate on node {pick} left a handler");
    }
}

#[test]
fn path_of_tail_lists_every_node() {
    let chain = chain();
    let labels: Vec<String> = chain
        .c
        .path()
        .iter()
        .map(|node| node.label().to_owned())
        .collect();
    assert_eq!(labels, vec!["a", "map", "filter"]);
    assert_eq!(chain.b.path().len(), 2);
}

#[test]
fn pipeline_disposes_one_branch_and_keeps_the_other() {
    let root = Stream::<i32>::named("root");

    let left = Pipeline::new();
    let evens = left.track(root.filter(|v: &i32| v % 2 == 0));
    let labelled = left.track(evens.map(|v: &i32| format!("even {v}")));
    let (left_log, _left_sub) = record(&labelled);

    let right = Pipeline::new();
    let tripled = right.track(root.map(|v: &i32| v * 3));
    let (right_log, _right_sub) = record(&tripled);

    root.emit_value(2).unwrap();
    left.dispose();
    root.emit_value(4).unwrap();

    assert_eq!(*left_log.borrow(), vec!["even 2".to_string()]);
    assert_eq!(*right_log.borrow(), vec![6, 12]);
}

#[test]
fn terminate_cascades_into_shared_root() {
    // The hazard Pipeline exists for: terminating one branch stops siblings.
    let root = Stream::<i32>::new();
    let left = root.map(|v: &i32| v + 1);
    let right = root.map(|v: &i32| v - 1);
    let (right_log, _sub) = record(&right);

    left.terminate();
    root.emit_value(10).unwrap();
    assert!(right_log.borrow().is_empty());
}

#[test]
fn dropping_tail_detaches_from_root() {
    let root = Stream::<i32>::new();
    {
        let tail = root.map(|v: &i32| v * 2).filter(|v: &i32| *v > 0);
        let (_log, sub) = record(&tail);
        assert_eq!(root.subscriber_count(), 1);
        drop(sub);
    }
    assert_eq!(root.subscriber_count(), 0);
}

#[test]
fn combined_snapshot_stream_tears_down_its_inputs_subscriptions() {
    let width = Stream::<u32>::new();
    let height = Stream::<u32>::new();
    let size = named_combine_latest([("w", width.clone()), ("h", height.clone())]).unwrap();
    let (log, _sub) = record(&size);

    width.emit_value(3).unwrap();
    height.emit_value(4).unwrap();
    assert_eq!(log.borrow().len(), 1);

    size.dispose();
    assert_eq!(width.subscriber_count(), 0);
    assert_eq!(height.subscriber_count(), 0);
}

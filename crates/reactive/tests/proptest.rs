//! Property-based tests for deepstate-reactive using proptest.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use deepstate_reactive::{Instance, Key, ManualScheduler, ModelType, Scheduler, Value};
use proptest::prelude::*;

const KEYS: [&str; 3] = ["a", "b", "c"];

fn abc() -> Rc<ModelType> {
    ModelType::builder("Abc")
        .value("a", 0)
        .value("b", 0)
        .value("c", 0)
        .build()
}

/// Chain `c0 = a + 1`, `c{i} = c{i-1} + 1`, with an evaluation counter per link.
fn chain(len: usize, evals: Rc<RefCell<Vec<usize>>>) -> Rc<ModelType> {
    evals.borrow_mut().resize(len, 0);
    let mut builder = ModelType::builder("Chain").value("a", 0);
    for i in 0..len {
        let prev = if i == 0 { "a".to_string() } else { format!("c{}", i - 1) };
        let evals = evals.clone();
        builder = builder.computed(&format!("c{}", i), move |v| {
            evals.borrow_mut()[i] += 1;
            Ok(Value::Int(v.get_int(&prev)? + 1))
        });
    }
    builder.build()
}

proptest! {
    /// Any number of writes in one turn produce at most one notification,
    /// and its frame lists each changed key once, in first-change order.
    #[test]
    fn writes_in_one_turn_coalesce(writes in prop::collection::vec((0usize..3, 0i64..4), 0..40)) {
        let sched = Rc::new(ManualScheduler::new());
        let t = Instance::new(&abc(), sched.clone());
        let frames: Rc<RefCell<Vec<Vec<Key>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = frames.clone();
        let _d = t.on(KEYS, move |keys| sink.borrow_mut().push(keys.to_vec())).unwrap();

        let mut current = [0i64; 3];
        let mut expected: Vec<&str> = Vec::new();
        for &(k, v) in &writes {
            if current[k] != v {
                current[k] = v;
                if !expected.contains(&KEYS[k]) {
                    expected.push(KEYS[k]);
                }
            }
            t.set(KEYS[k], v).unwrap();
        }
        prop_assert!(sched.pending() <= 1);
        sched.flush_now();

        let frames = frames.borrow();
        if expected.is_empty() {
            prop_assert!(frames.is_empty());
        } else {
            prop_assert_eq!(frames.len(), 1);
            let got: Vec<&str> = frames[0].iter().map(|k| &**k).collect();
            prop_assert_eq!(got, expected);
        }
        for (i, key) in KEYS.iter().enumerate() {
            prop_assert_eq!(t.get(key).unwrap(), Value::Int(current[i]));
        }
    }

    /// Writing the stored value never opens a batch.
    #[test]
    fn equal_writes_never_emit(v in any::<i64>(), s in "[a-z]{0,8}") {
        let sched = Rc::new(ManualScheduler::new());
        let ty = ModelType::builder("T").value("n", v).value("s", s.as_str()).build();
        let t = Instance::new(&ty, sched.clone());

        t.set("n", v).unwrap();
        t.set("s", s.as_str()).unwrap();
        prop_assert!(!t.observer().is_pending());
        prop_assert_eq!(sched.pending(), 0);
    }

    /// A computed chain always settles to the current input, evaluating each
    /// link at most once per flush.
    #[test]
    fn computed_chain_settles(len in 1usize..6, inputs in prop::collection::vec(-50i64..50, 1..10)) {
        let sched = Rc::new(ManualScheduler::new());
        let evals = Rc::new(RefCell::new(Vec::new()));
        let t = Instance::new(&chain(len, evals.clone()), sched.clone());
        let last = format!("c{}", len - 1);

        prop_assert_eq!(t.get(&last).unwrap(), Value::Int(len as i64));
        prop_assert!(evals.borrow().iter().all(|&n| n == 1));

        let flushes = Rc::new(Cell::new(0));
        let f = flushes.clone();
        let _d = t.on([last.as_str()], move |_| f.set(f.get() + 1)).unwrap();

        let mut current = 0;
        for &input in &inputs {
            let before = evals.borrow().clone();
            t.set("a", input).unwrap();
            sched.flush_now();

            let after = evals.borrow().clone();
            for (b, a) in before.iter().zip(after.iter()) {
                prop_assert!(a - b <= 1);
            }
            if input != current {
                prop_assert!(after.iter().zip(before.iter()).all(|(a, b)| a - b == 1));
            }
            current = input;
            prop_assert_eq!(t.get(&last).unwrap(), Value::Int(input + len as i64));
        }
    }
}

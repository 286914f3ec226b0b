//! Concurrent producers on both stations against one shared store. Each
//! inference path runs on its own thread, mirroring the deployment shape.

use std::sync::Arc;
use std::thread;

use rollinspect::{
    Component, Detection, DurableStore, PredictionLedger, SessionAggregator, TableKind,
};

const RECORDS_PER_THREAD: usize = 25;

#[test]
fn parallel_records_are_all_durable_and_counted() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DurableStore::open(dir.path()).unwrap());

    SessionAggregator::new(store.clone())
        .start_session("s1")
        .unwrap();

    let mut handles = Vec::new();
    for (thread_index, component) in [Component::Od, Component::Bf, Component::Od, Component::Bf]
        .into_iter()
        .enumerate()
    {
        let store = store.clone();
        handles.push(thread::spawn(move || {
            let ledger = PredictionLedger::new(store.clone());
            let aggregator = SessionAggregator::new(store);
            for i in 0..RECORDS_PER_THREAD {
                // Alternate accepted and rejected batches.
                let detections = if (thread_index + i) % 2 == 0 {
                    vec![Detection::new("roller", 0.9)]
                } else {
                    vec![Detection::new("roller", 0.8), Detection::new("rust", 0.6)]
                };
                ledger
                    .record(component, &detections, "s1", "TRB-32", "emp-7")
                    .unwrap();
                aggregator.update("s1", component, &detections).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Two threads per component, no event lost.
    for component in Component::ALL {
        assert_eq!(
            store.count_rows(component, TableKind::Events).unwrap(),
            2 * RECORDS_PER_THREAD
        );
    }

    let stats = SessionAggregator::new(store.clone()).stats().unwrap();
    for component_stats in [stats.od, stats.bf] {
        assert_eq!(component_stats.total_inspected, 2 * RECORDS_PER_THREAD as u64);
        assert_eq!(
            component_stats.total_inspected,
            component_stats.total_accepted + component_stats.total_rejected
        );
    }

    // No prediction id collided.
    let mut ids: Vec<String> = Vec::new();
    for component in Component::ALL {
        for event in store.read_events(component).unwrap() {
            ids.push(event.prediction_id);
        }
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4 * RECORDS_PER_THREAD);
}

//! Integration tests for the concrete scenarios named in the kernel's
//! testable-properties list: a single-server FIFO queue, priority
//! preemption, a continuous buffer, store filter fairness, a broadcast
//! event, and run-to-run determinism.

use std::cell::RefCell;
use std::rc::Rc;

use simcore::prelude::*;

fn single_server(resource: Resource, service: Time) -> impl FnMut(Resume) -> ProcessOutcome {
    #[derive(Clone, Copy)]
    enum Step {
        Requesting,
        InService,
        Releasing,
        Done,
    }
    let mut step = Step::Requesting;
    move |input: Resume| match step {
        Step::Requesting => {
            step = Step::InService;
            ProcessOutcome::Yield(resource.request(0))
        }
        Step::InService => match input {
            Resume::Value(_) => {
                step = Step::Releasing;
                ProcessOutcome::Yield(timeout(service))
            }
            Resume::Interrupt(_) => unreachable!("non-preemptive resource never interrupts"),
        },
        Step::Releasing => {
            step = Step::Done;
            ProcessOutcome::Action(resource.release())
        }
        Step::Done => ProcessOutcome::Done,
    }
}

#[test]
fn s1_single_server_fifo() {
    let mut sim = Simulation::new();
    let resource = sim.create_resource(1, ResourceConfig::default()).unwrap();
    for arrival in [0.0, 1.0, 2.0] {
        let resource = resource;
        sim.schedule(arrival, move |sim| {
            sim.process(move || Box::new(single_server(resource, 5.0)));
        })
        .unwrap();
    }
    sim.run(None).unwrap();
    let stats = sim.resource_stats(resource);
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.total_releases, 3);
    // waits are 0, 4, 8 -> average 4.0
    assert_eq!(stats.average_wait_time, 4.0);
}

fn preemptible_server(
    resource: Resource,
    priority: i32,
    service: Time,
) -> impl FnMut(Resume) -> ProcessOutcome {
    #[derive(Clone, Copy)]
    enum Step {
        Requesting,
        InService,
        Retrying,
        Releasing,
        Done,
    }
    let mut step = Step::Requesting;
    move |input: Resume| match step {
        Step::Requesting => {
            step = Step::InService;
            ProcessOutcome::Yield(resource.request(priority))
        }
        Step::InService => match input {
            Resume::Value(_) => {
                step = Step::Releasing;
                ProcessOutcome::Yield(timeout(service))
            }
            Resume::Interrupt(_) => {
                step = Step::Retrying;
                ProcessOutcome::Yield(resource.request(priority))
            }
        },
        Step::Retrying => {
            step = Step::Releasing;
            ProcessOutcome::Yield(timeout(service))
        }
        Step::Releasing => {
            step = Step::Done;
            ProcessOutcome::Action(resource.release())
        }
        Step::Done => ProcessOutcome::Done,
    }
}

#[test]
fn s2_priority_preemption() {
    let mut sim = Simulation::new();
    let resource = sim
        .create_resource(1, ResourceConfig { preemptive: true, ..Default::default() })
        .unwrap();

    let log: Rc<RefCell<Vec<(f64, &'static str)>>> = Rc::new(RefCell::new(Vec::new()));
    let log_handler = log.clone();
    sim.on(TraceChannel::Resources, move |e| {
        if e.op == "grant" || e.op == "preempt" {
            log_handler.borrow_mut().push((e.time, e.op));
        }
    });
    sim.enable_trace(TraceMask::of(&[TraceChannel::Resources]));

    sim.process(move || Box::new(preemptible_server(resource, 10, 5.0)));
    sim.schedule(1.0, move |sim| {
        sim.process(move || Box::new(preemptible_server(resource, 0, 3.0)));
    })
    .unwrap();

    sim.run(None).unwrap();

    let entries = log.borrow().clone();
    assert_eq!(entries[0], (0.0, "grant"));
    assert_eq!(entries[1], (1.0, "preempt"));
    assert_eq!(entries[2], (1.0, "grant"));
    // A retries once interrupted and acquires once B releases at 1 + 3 = 4.
    assert_eq!(entries[3], (4.0, "grant"));
}

fn repeated_buffer_op(
    buffer: Buffer,
    amount: f64,
    n: u32,
    put: bool,
) -> impl FnMut(Resume) -> ProcessOutcome {
    #[derive(Clone, Copy)]
    enum Step {
        Op(u32),
        Wait(u32),
    }
    let mut step = Step::Op(0);
    move |_input| match step {
        Step::Op(i) => {
            if i >= n {
                return ProcessOutcome::Done;
            }
            step = Step::Wait(i + 1);
            if put {
                ProcessOutcome::Yield(buffer.put(amount))
            } else {
                ProcessOutcome::Yield(buffer.get(amount))
            }
        }
        Step::Wait(i) => {
            step = Step::Op(i);
            ProcessOutcome::Yield(timeout(1.0))
        }
    }
}

#[test]
fn s3_buffer_producer_consumer() {
    let mut sim = Simulation::new();
    let buf = sim.create_buffer(100.0, BufferConfig::default()).unwrap();
    sim.process(move || Box::new(repeated_buffer_op(buf, 10.0, 20, true)));
    sim.process(move || Box::new(repeated_buffer_op(buf, 5.0, 20, false)));
    sim.run(Some(20.0)).unwrap();
    let stats = sim.buffer_stats(buf);
    assert_eq!(stats.total_amount_put, 200.0);
    assert_eq!(stats.total_amount_got, 100.0);
    assert_eq!(sim.buffer_level(buf), 100.0);
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Part {
    kind: &'static str,
}

#[test]
fn s4_store_filter_fairness() {
    let mut sim = Simulation::new();
    let store: Store<Part> = sim.create_store(10, StoreConfig::default()).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));

    let log_g1 = log.clone();
    sim.process(move || {
        let mut waiting = true;
        Box::new(move |input| {
            if waiting {
                waiting = false;
                return ProcessOutcome::Yield(store.get_matching(|p: &Part| p.kind == "A"));
            }
            if let Resume::Value(v) = input {
                if let Some(p) = v.into_typed::<Part>() {
                    log_g1.borrow_mut().push(("g1", p.kind));
                }
            }
            ProcessOutcome::Done
        })
    });

    let log_g2 = log.clone();
    sim.process(move || {
        let mut waiting = true;
        Box::new(move |input| {
            if waiting {
                waiting = false;
                return ProcessOutcome::Yield(store.get());
            }
            if let Resume::Value(v) = input {
                if let Some(p) = v.into_typed::<Part>() {
                    log_g2.borrow_mut().push(("g2", p.kind));
                }
            }
            ProcessOutcome::Done
        })
    });

    sim.process(move || {
        let mut done = false;
        Box::new(move |_| {
            if done {
                return ProcessOutcome::Done;
            }
            done = true;
            ProcessOutcome::Yield(store.put(Part { kind: "B" }))
        })
    });

    sim.schedule(1.0, move |sim| {
        sim.process(move || {
            let mut done = false;
            Box::new(move |_| {
                if done {
                    return ProcessOutcome::Done;
                }
                done = true;
                ProcessOutcome::Yield(store.put(Part { kind: "A" }))
            })
        });
    })
    .unwrap();

    sim.run(None).unwrap();
    assert_eq!(log.borrow().as_slice(), &[("g2", "B"), ("g1", "A")]);
}

#[test]
fn s5_sim_event_broadcast() {
    let mut sim = Simulation::new();
    let ev = sim.create_sim_event(SimEventConfig::default()).unwrap();
    let log: Rc<RefCell<Vec<(Time, &'static str)>>> = Rc::new(RefCell::new(Vec::new()));

    for (arrival, name) in [(1.0, "w1"), (2.0, "w2"), (3.0, "w3")] {
        let log = log.clone();
        sim.schedule(arrival, move |sim| {
            sim.process(move || {
                let mut waiting = true;
                Box::new(move |input| {
                    if waiting {
                        waiting = false;
                        return ProcessOutcome::Yield(ev.wait());
                    }
                    if let Resume::Value(v) = input {
                        if let Some(msg) = v.into_event::<String>() {
                            log.borrow_mut().push((5.0, name));
                            let _ = msg;
                        }
                    }
                    ProcessOutcome::Done
                })
            });
        })
        .unwrap();
    }

    sim.schedule(5.0, move |sim| {
        sim.process(move || {
            let mut done = false;
            Box::new(move |_| {
                if done {
                    return ProcessOutcome::Done;
                }
                done = true;
                ProcessOutcome::Action(ev.trigger_with("go".to_string()))
            })
        });
    })
    .unwrap();

    sim.run(None).unwrap();
    assert_eq!(log.borrow().as_slice(), &[(5.0, "w1"), (5.0, "w2"), (5.0, "w3")]);
}

#[test]
fn s6_same_seed_same_trace() {
    let _ = env_logger::try_init();

    fn run_once() -> Vec<String> {
        let mut rng = Random::new(42);
        let services: Vec<f64> = (0..3).map(|_| rng.exponential(0.2).unwrap()).collect();

        let mut sim = Simulation::new();
        let resource = sim.create_resource(1, ResourceConfig::default()).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_handler = log.clone();
        sim.on(TraceChannel::Resources, move |e| log_handler.borrow_mut().push(e.to_string()));
        sim.enable_trace(TraceMask::of(&[TraceChannel::Resources]));

        for (i, &service) in services.iter().enumerate() {
            let resource = resource;
            sim.schedule(i as f64, move |sim| {
                sim.process(move || Box::new(single_server(resource, service)));
            })
            .unwrap();
        }
        sim.run(None).unwrap();
        log.borrow().clone()
    }

    assert_eq!(run_once(), run_once());
}

#[test]
fn s7_wait_for_wakes_once_flag_becomes_true() {
    let mut sim = Simulation::new();
    let flag = Rc::new(RefCell::new(false));
    let flag_writer = flag.clone();
    sim.schedule(3.0, move |_| {
        *flag_writer.borrow_mut() = true;
    })
    .unwrap();

    let flag_reader = flag.clone();
    let process = sim.process(move || {
        let mut waited = false;
        Box::new(move |input| {
            if !waited {
                waited = true;
                let flag_reader = flag_reader.clone();
                return ProcessOutcome::Yield(wait_for(move || *flag_reader.borrow(), 1.0, 10));
            }
            match input {
                Resume::Value(ResumeValue::Ready) => ProcessOutcome::Done,
                _ => unreachable!("condition should have become true before exhausting max_iters"),
            }
        })
    });

    sim.run(None).unwrap();
    assert!(*flag.borrow());
    assert_eq!(sim.process_state(process), Some(ProcessState::Completed));
}

#[test]
fn s7_wait_for_first_check_is_one_interval_later() {
    let mut sim = Simulation::new();
    let checks = Rc::new(RefCell::new(Vec::new()));
    let checks_writer = checks.clone();

    sim.process(move || {
        let mut waited = false;
        Box::new(move |input| {
            if !waited {
                waited = true;
                let checks_writer = checks_writer.clone();
                return ProcessOutcome::Yield(wait_for(
                    move || {
                        checks_writer.borrow_mut().push(());
                        checks_writer.borrow().len() >= 2
                    },
                    2.0,
                    5,
                ));
            }
            if let Resume::Value(_) = input {
                return ProcessOutcome::Done;
            }
            unreachable!("predicate becomes true on the second check")
        })
    });

    let summary = sim.run(None).unwrap();
    assert_eq!(checks.borrow().len(), 2);
    assert_eq!(summary.end_time, 4.0);
}

#[test]
fn s7_wait_for_times_out_after_max_iters() {
    let mut sim = Simulation::new();
    let failed = Rc::new(RefCell::new(false));
    let failed_writer = failed.clone();

    sim.process(move || {
        let mut waited = false;
        Box::new(move |input| {
            if !waited {
                waited = true;
                return ProcessOutcome::Yield(wait_for(|| false, 1.0, 3));
            }
            match input {
                Resume::Interrupt(SimError::ConditionTimeout) => {
                    *failed_writer.borrow_mut() = true;
                    ProcessOutcome::Done
                }
                _ => unreachable!("predicate never holds, must time out"),
            }
        })
    });

    let summary = sim.run(None).unwrap();
    assert!(*failed.borrow());
    assert_eq!(summary.end_time, 3.0);
}

//! Ordering guarantees of the event loop
//!
//! Every test runs on a virtual clock, so the invocation order is a pure
//! function of due times and registration order.

mod common;

use common::{log_to, virtual_loop, Trace};
use quicktick::{LoopState, Promise, Scheduler, TimerHandle, Timestamp};
use std::cell::Cell;
use std::rc::Rc;

mod timer_order {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_distinct_delays_fire_in_ascending_order() {
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        el.run_main(move |s| {
            s.set_timeout(300, log_to(&t, "300"));
            s.set_timeout(100, log_to(&t, "100"));
            s.set_timeout(200, log_to(&t, "200"));
            s.set_timeout(0, log_to(&t, "0"));
            Ok(())
        })
        .unwrap();
        assert_eq!(trace.entries(), vec!["0", "100", "200", "300"]);
    }

    #[test]
    fn test_equal_delays_fire_in_registration_order() {
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        el.run_main(move |s| {
            for name in ["a", "b", "c", "d"] {
                s.set_timeout(50, log_to(&t, name));
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(trace.entries(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_timer_scheduled_from_callback_runs_after_current_batch() {
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        el.run_main(move |s| {
            let inner = t.clone();
            s.set_timeout(10, move |s| {
                inner.push("first");
                s.set_timeout(0, log_to(&inner, "nested"));
                Ok(())
            });
            s.set_timeout(10, log_to(&t, "second"));
            Ok(())
        })
        .unwrap();
        assert_eq!(trace.entries(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn test_interval_orders_ahead_of_timer_it_registers_for_same_time() {
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        let count = Rc::new(Cell::new(0));
        let own: Rc<Cell<Option<TimerHandle>>> = Rc::default();
        let o = own.clone();
        let handle = el.scheduler().set_interval(500, move |s| {
            count.set(count.get() + 1);
            t.push(format!("interval {}", count.get()));
            if count.get() == 1 {
                s.set_timeout(500, log_to(&t, "timeout registered in interval"));
            } else if let Some(h) = o.get() {
                s.clear_interval(h);
            }
            Ok(())
        });
        own.set(Some(handle));

        el.run().unwrap();
        assert_eq!(
            trace.entries(),
            vec![
                "interval 1",
                "interval 2",
                "timeout registered in interval"
            ]
        );
    }

    #[test]
    fn test_zero_period_interval_lets_time_advance() {
        let (mut el, _, _) = virtual_loop();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let result = el
            .run_main(move |s| {
                let interval = s.set_interval(0, move |_| {
                    c.set(c.get() + 1);
                    Ok(())
                });
                s.set_timeout(5, move |s: &mut Scheduler| {
                    s.clear_interval(interval);
                    Ok(())
                });
                Ok(())
            })
            .unwrap();
        // Fires at 1, 2, 3 and 4ms; the timeout wins the tie at 5ms
        assert_eq!(count.get(), 4);
        assert_eq!(result.final_time, Timestamp::from_millis(5));
    }

    #[test]
    fn test_fire_time_matches_due_time() {
        let (mut el, clock, _) = virtual_loop();
        let seen = Rc::new(Cell::new(Timestamp::ZERO));
        let at = seen.clone();
        el.scheduler().set_timeout(750, move |s| {
            at.set(s.now());
            Ok(())
        });
        el.run().unwrap();
        assert_eq!(seen.get(), Timestamp::from_millis(750));
        assert_eq!(quicktick::Clock::now(&clock), Timestamp::from_millis(750));
    }
}

mod cancellation {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cancelled_before_due_never_fires() {
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        el.run_main(move |s| {
            let doomed = s.set_timeout(100, log_to(&t, "doomed"));
            s.set_timeout(50, log_to(&t, "kept"));
            s.clear_timeout(doomed);
            Ok(())
        })
        .unwrap();
        assert_eq!(trace.entries(), vec!["kept"]);
    }

    #[test]
    fn test_cancelled_by_earlier_timer_in_same_batch() {
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        let victim: Rc<Cell<Option<TimerHandle>>> = Rc::default();
        let v = victim.clone();
        el.run_main(move |s| {
            let killer_trace = t.clone();
            let kv = v.clone();
            s.set_timeout(100, move |s| {
                killer_trace.push("killer");
                if let Some(h) = kv.get() {
                    s.clear_timeout(h);
                }
                Ok(())
            });
            let h = s.set_timeout(100, log_to(&t, "victim"));
            v.set(Some(h));
            s.set_timeout(100, log_to(&t, "bystander"));
            Ok(())
        })
        .unwrap();
        assert_eq!(trace.entries(), vec!["killer", "bystander"]);
    }

    #[test]
    fn test_cancelled_from_microtask_inside_batch() {
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        let victim: Rc<Cell<Option<TimerHandle>>> = Rc::default();
        let v = victim.clone();
        el.run_main(move |s| {
            let first = t.clone();
            let fv = v.clone();
            s.set_timeout(20, move |s| {
                first.push("first");
                let v = fv.clone();
                s.queue_microtask(move |s| {
                    if let Some(h) = v.get() {
                        s.clear_timeout(h);
                    }
                    Ok(())
                });
                Ok(())
            });
            let h = s.set_timeout(20, log_to(&t, "second"));
            v.set(Some(h));
            Ok(())
        })
        .unwrap();
        assert_eq!(trace.entries(), vec!["first"]);
    }

    #[test]
    fn test_timer_cancelling_later_timer_scenario() {
        // setTimeout(A, 2000); setTimeout(B, 1000) where B cancels A;
        // Promise.resolve().then(C)
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        let result = el
            .run_main(move |s| {
                let a = s.set_timeout(2000, log_to(&t, "A"));
                let b_trace = t.clone();
                s.set_timeout(1000, move |s| {
                    b_trace.push("B");
                    s.clear_timeout(a);
                    Ok(())
                });
                let c_trace = t.clone();
                Promise::resolved(()).then(s, move |_, ()| {
                    c_trace.push("C");
                    Ok(())
                });
                Ok(())
            })
            .unwrap();
        assert_eq!(trace.entries(), vec!["C", "B"]);
        assert_eq!(result.timers_fired, 1);
        assert_eq!(result.final_time, Timestamp::from_millis(1000));
    }

    #[test]
    fn test_self_cancelling_interval_fires_exactly_three_times() {
        let (mut el, _, _) = virtual_loop();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let own: Rc<Cell<Option<TimerHandle>>> = Rc::default();
        let o = own.clone();
        let handle = el.scheduler().set_interval(500, move |s| {
            c.set(c.get() + 1);
            if c.get() == 3 {
                if let Some(h) = o.get() {
                    s.clear_interval(h);
                }
            }
            Ok(())
        });
        own.set(Some(handle));

        let result = el.run().unwrap();
        assert_eq!(count.get(), 3);
        assert_eq!(result.timers_fired, 3);
        assert_eq!(result.final_time, Timestamp::from_millis(1500));
        assert!(!el.scheduler().is_pending(handle));
    }

    #[test]
    fn test_interval_cancelled_by_other_timer() {
        let (mut el, _, _) = virtual_loop();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        el.run_main(move |s| {
            let interval = s.set_interval(100, move |_| {
                c.set(c.get() + 1);
                Ok(())
            });
            s.set_timeout(350, move |s: &mut Scheduler| {
                s.clear_interval(interval);
                Ok(())
            });
            Ok(())
        })
        .unwrap();
        assert_eq!(count.get(), 3);
    }
}

mod microtask_interleaving {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_top_level_microtasks_run_before_zero_delay_timer() {
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        el.run_main(move |s| {
            s.set_timeout(0, log_to(&t, "timer"));
            s.queue_microtask(log_to(&t, "microtask"));
            t.push("script");
            Ok(())
        })
        .unwrap();
        assert_eq!(trace.entries(), vec!["script", "microtask", "timer"]);
    }

    #[test]
    fn test_microtasks_from_timer_run_before_next_timer_in_batch() {
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        el.run_main(move |s| {
            let first = t.clone();
            s.set_timeout(10, move |s| {
                first.push("timer 1");
                let chained = first.clone();
                s.queue_microtask(move |s| {
                    chained.push("micro 1");
                    s.queue_microtask(log_to(&chained, "micro 1 nested"));
                    Ok(())
                });
                Ok(())
            });
            s.set_timeout(10, log_to(&t, "timer 2"));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            trace.entries(),
            vec!["timer 1", "micro 1", "micro 1 nested", "timer 2"]
        );
    }

    #[test]
    fn test_promise_chain_completes_between_timers() {
        let (mut el, _, _) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        el.run_main(move |s| {
            let first = t.clone();
            s.set_timeout(5, move |s| {
                let step = first.clone();
                let done = first.clone();
                Promise::resolved(1)
                    .then(s, move |_, v| {
                        step.push(format!("step {}", v));
                        Ok(v + 1)
                    })
                    .then(s, move |_, v| {
                        done.push(format!("step {}", v));
                        Ok(())
                    });
                Ok(())
            });
            s.set_timeout(5, log_to(&t, "next timer"));
            Ok(())
        })
        .unwrap();
        assert_eq!(trace.entries(), vec!["step 1", "step 2", "next timer"]);
    }
}

mod termination {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_terminates_when_all_work_is_done() {
        let (mut el, _, _) = virtual_loop();
        el.scheduler().set_timeout(10, |_| Ok(()));
        el.scheduler().queue_microtask(|_| Ok(()));
        assert!(el.has_pending_work());
        el.run().unwrap();
        assert_eq!(el.state(), LoopState::Terminated);
        assert!(!el.has_pending_work());
    }

    #[test]
    fn test_does_not_terminate_while_timer_pending() {
        let (mut el, _, _) = virtual_loop();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        el.run_main(move |s| {
            s.set_timeout(1_000_000, move |_| {
                f.set(true);
                Ok(())
            });
            Ok(())
        })
        .unwrap();
        assert!(fired.get());
        assert_eq!(el.now(), Timestamp::from_millis(1_000_000));
    }

    #[test]
    fn test_errors_do_not_stop_the_loop() {
        let (mut el, _, errors) = virtual_loop();
        let trace = Trace::new();
        let t = trace.clone();
        let result = el
            .run_main(move |s| {
                s.set_timeout(10, |_| Err(quicktick::CallbackError::type_error("boom")));
                s.set_timeout(20, log_to(&t, "after"));
                Ok(())
            })
            .unwrap();
        assert_eq!(trace.entries(), vec!["after"]);
        assert_eq!(result.errors, 1);
        assert_eq!(errors.borrow().len(), 1);
        assert_eq!(el.state(), LoopState::Terminated);
    }
}

//! End-to-end behavior of the table event engine: dispatch ordering,
//! history replay, loop handling, scope filtering, and listener lifecycle.

use std::sync::{Arc, Mutex};

use gridpulse_core::{header, CellValue, GridError, Table, TableListenerEvent};
use proptest::prelude::*;

type Log<T> = Arc<Mutex<Vec<T>>>;

fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

fn int(value: &CellValue) -> i64 {
    match value {
        CellValue::Int(i) => *i,
        CellValue::Unit => 0,
        other => panic!("expected int, got {other:?}"),
    }
}

#[test]
fn listeners_run_in_ascending_order_then_registration_sequence() {
    let t = Table::new_detached("t");
    let seen: Log<&str> = log();

    for (name, order) in [("third", 7), ("first", -2), ("fourth", 7), ("second", 0)] {
        let seen = Arc::clone(&seen);
        t.on(move |cfg| {
            cfg.order(order).events(move |_| seen.lock().unwrap().push(name));
        })
        .unwrap();
    }

    t.set(&header("A"), 0, 1i64).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["first", "second", "third", "fourth"]
    );
}

#[test]
fn history_is_delivered_exactly_once() {
    let t = Table::new_detached("t");
    t.set(&header("X"), 1, "v").unwrap();
    t.set(&header("Y"), 2, 9i64).unwrap();

    let batches: Log<Vec<(CellValue, CellValue)>> = log();
    {
        let batches = Arc::clone(&batches);
        t.on(move |cfg| {
            cfg.events(move |events: &[TableListenerEvent]| {
                batches.lock().unwrap().push(
                    events
                        .iter()
                        .map(|e| (e.old.value.clone(), e.new.value.clone()))
                        .collect(),
                );
            });
        })
        .unwrap();
    }

    // One history batch covering both pre-existing cells, old = empty.
    {
        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0],
            vec![
                (CellValue::Unit, CellValue::from("v")),
                (CellValue::Unit, CellValue::Int(9)),
            ]
        );
    }

    // A later write delivers only itself, never the history again.
    t.set(&header("X"), 1, "w").unwrap();
    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(
        batches[1],
        vec![(CellValue::from("v"), CellValue::from("w"))]
    );
}

#[test]
fn skip_history_suppresses_the_replay() {
    let t = Table::new_detached("t");
    t.set(&header("X"), 1, "v").unwrap();

    let count: Log<usize> = log();
    {
        let count = Arc::clone(&count);
        t.on(move |cfg| {
            cfg.skip_history(true)
                .events(move |events: &[TableListenerEvent]| {
                    count.lock().unwrap().push(events.len());
                });
        })
        .unwrap();
    }
    assert!(count.lock().unwrap().is_empty());

    t.set(&header("X"), 1, "w").unwrap();
    assert_eq!(*count.lock().unwrap(), vec![1]);
}

#[test]
fn self_triggering_listener_without_allow_loop_fails_the_mutation() {
    let t = Table::new_detached("t");
    let inner = t.clone();
    t.on(move |cfg| {
        cfg.name("echo").events(move |_| {
            inner.set(&header("A"), 0, 1i64).unwrap();
        });
    })
    .unwrap();

    let err = t.set(&header("A"), 0, 0i64).unwrap_err();
    assert!(matches!(err, GridError::ListenerLoop { .. }));
    assert!(err.to_string().contains("echo"));
}

#[test]
fn allow_loop_listener_converges_to_its_target() {
    let t = Table::new_detached("t");
    let inner = t.clone();
    t.on(move |cfg| {
        cfg.allow_loop(true)
            .events(move |events: &[TableListenerEvent]| {
                for e in events {
                    let v = int(&e.new.value);
                    if v < 10 {
                        inner.set(&header("A"), 0, v + 1).unwrap();
                    }
                }
            });
    })
    .unwrap();

    t.set(&header("A"), 0, 0i64).unwrap();
    assert_eq!(int(&t.get(&header("A"), 0)), 10);
}

#[test]
fn column_listener_never_sees_other_columns() {
    let t = Table::new_detached("t");
    let a = t.column(&header("A")).unwrap();
    let seen: Log<String> = log();
    {
        let seen = Arc::clone(&seen);
        a.on(move |cfg| {
            cfg.events(move |events: &[TableListenerEvent]| {
                for e in events {
                    seen.lock().unwrap().push(e.new.column.header.to_string());
                }
            });
        })
        .unwrap();
    }

    t.set(&header("B"), 0, 1i64).unwrap();
    t.set(&header("A"), 0, 2i64).unwrap();
    t.set(&header("B"), 1, 3i64).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["[A]".to_string()]);
}

#[test]
fn row_listener_sees_every_column_at_its_index() {
    let t = Table::new_detached("t");
    let seen: Log<(String, i64)> = log();
    {
        let seen = Arc::clone(&seen);
        t.row(1).on(move |cfg| {
            cfg.events(move |events: &[TableListenerEvent]| {
                for e in events {
                    seen.lock()
                        .unwrap()
                        .push((e.new.column.header.to_string(), e.new.index));
                }
            });
        })
        .unwrap();
    }

    t.set(&header("A"), 0, 1i64).unwrap();
    t.set(&header("A"), 1, 2i64).unwrap();
    t.set(&header("B"), 1, 3i64).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("[A]".to_string(), 1), ("[B]".to_string(), 1)]
    );
}

#[test]
fn range_listener_is_rectangular() {
    let t = Table::new_detached("t");
    // Fix column order: A, B, C.
    t.column(&header("A")).unwrap();
    t.column(&header("B")).unwrap();
    t.column(&header("C")).unwrap();

    let range = t.range(&header("A"), 1, &header("B"), 2).unwrap();
    let seen: Log<(String, i64)> = log();
    {
        let seen = Arc::clone(&seen);
        range
            .on(move |cfg| {
                cfg.events(move |events: &[TableListenerEvent]| {
                    for e in events {
                        seen.lock()
                            .unwrap()
                            .push((e.new.column.header.to_string(), e.new.index));
                    }
                });
            })
            .unwrap();
    }

    t.set(&header("A"), 1, 1i64).unwrap();
    t.set(&header("B"), 2, 2i64).unwrap();
    t.set(&header("C"), 1, 3i64).unwrap(); // outside: column
    t.set(&header("A"), 3, 4i64).unwrap(); // outside: index
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("[A]".to_string(), 1), ("[B]".to_string(), 2)]
    );
}

#[test]
fn cell_listener_matches_one_location() {
    let t = Table::new_detached("t");
    let cell = t.cell(&header("A"), 5).unwrap();
    let seen: Log<i64> = log();
    {
        let seen = Arc::clone(&seen);
        cell.on(move |cfg| {
            cfg.events(move |events: &[TableListenerEvent]| {
                for e in events {
                    seen.lock().unwrap().push(int(&e.new.value));
                }
            });
        })
        .unwrap();
    }

    t.set(&header("A"), 4, 1i64).unwrap();
    t.set(&header("B"), 5, 2i64).unwrap();
    t.set(&header("A"), 5, 3i64).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![3]);
}

#[test]
fn renamed_column_keeps_its_subscriptions() {
    let t = Table::new_detached("t");
    let a = t.column(&header("A")).unwrap();
    let seen: Log<i64> = log();
    {
        let seen = Arc::clone(&seen);
        a.on(move |cfg| {
            cfg.events(move |events: &[TableListenerEvent]| {
                for e in events {
                    seen.lock().unwrap().push(int(&e.new.value));
                }
            });
        })
        .unwrap();
    }

    t.rename_column(&header("A"), &header("A2")).unwrap();
    t.set(&header("A2"), 0, 1i64).unwrap();
    // The id fast path keeps the pre-rename subscription live.
    assert_eq!(*seen.lock().unwrap(), vec![1]);
}

#[test]
fn remove_column_publishes_clear_events() {
    let t = Table::new_detached("t");
    t.set(&header("A"), 0, 1i64).unwrap();
    t.set(&header("A"), 1, 2i64).unwrap();
    t.set(&header("B"), 0, 3i64).unwrap();

    let seen: Log<(String, i64, CellValue, CellValue)> = log();
    {
        let seen = Arc::clone(&seen);
        t.on(move |cfg| {
            cfg.skip_history(true)
                .events(move |events: &[TableListenerEvent]| {
                    for e in events {
                        seen.lock().unwrap().push((
                            e.new.column.header.to_string(),
                            e.new.index,
                            e.old.value.clone(),
                            e.new.value.clone(),
                        ));
                    }
                });
        })
        .unwrap();
    }

    t.remove_column(&header("A")).unwrap();
    assert!(t.get(&header("A"), 0).is_unit());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("[A]".to_string(), 0, CellValue::Int(1), CellValue::Unit),
            ("[A]".to_string(), 1, CellValue::Int(2), CellValue::Unit),
        ]
    );
}

#[test]
fn remove_row_clears_across_columns() {
    let t = Table::new_detached("t");
    t.set(&header("A"), 0, 1i64).unwrap();
    t.set(&header("B"), 0, 2i64).unwrap();
    t.set(&header("B"), 1, 3i64).unwrap();

    let seen: Log<(String, i64)> = log();
    {
        let seen = Arc::clone(&seen);
        t.on(move |cfg| {
            cfg.skip_history(true)
                .events(move |events: &[TableListenerEvent]| {
                    for e in events {
                        seen.lock()
                            .unwrap()
                            .push((e.new.column.header.to_string(), e.new.index));
                    }
                });
        })
        .unwrap();
    }

    t.remove_row(0).unwrap();
    assert!(t.get(&header("A"), 0).is_unit());
    assert!(t.get(&header("B"), 0).is_unit());
    assert_eq!(int(&t.get(&header("B"), 1)), 3);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("[A]".to_string(), 0), ("[B]".to_string(), 0)]
    );
}

#[test]
fn event_versions_strictly_increase() {
    let t = Table::new_detached("t");
    let versions: Log<u64> = log();
    {
        let versions = Arc::clone(&versions);
        t.on(move |cfg| {
            cfg.events(move |events: &[TableListenerEvent]| {
                for e in events {
                    versions.lock().unwrap().push(e.new.version);
                }
            });
        })
        .unwrap();
    }

    for i in 0..5 {
        t.set(&header("A"), i, i).unwrap();
    }
    let versions = versions.lock().unwrap();
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn unsubscribe_is_idempotent_and_final() {
    let t = Table::new_detached("t");
    let count: Log<usize> = log();
    let sub = {
        let count = Arc::clone(&count);
        t.on(move |cfg| {
            cfg.events(move |events: &[TableListenerEvent]| {
                count.lock().unwrap().push(events.len());
            });
        })
        .unwrap()
    };

    t.set(&header("A"), 0, 1i64).unwrap();
    sub.unsubscribe();
    sub.unsubscribe();
    t.set(&header("A"), 0, 2i64).unwrap();
    assert_eq!(*count.lock().unwrap(), vec![1]);
}

#[test]
fn instant_unsubscribe_in_the_config_closure_sees_nothing() {
    let t = Table::new_detached("t");
    t.set(&header("A"), 0, 1i64).unwrap();

    let count: Log<usize> = log();
    let sub = {
        let count = Arc::clone(&count);
        t.on(move |cfg| {
            cfg.events(move |events: &[TableListenerEvent]| {
                count.lock().unwrap().push(events.len());
            });
            // Unsubscribing before registration completes wins: no
            // history, no future events.
            cfg.reference().unsubscribe();
        })
        .unwrap()
    };

    t.set(&header("A"), 0, 2i64).unwrap();
    assert!(count.lock().unwrap().is_empty());
    sub.unsubscribe();
}

#[test]
fn unsubscribe_from_inside_a_callback_stops_further_delivery() {
    let t = Table::new_detached("t");
    let count: Log<usize> = log();
    let slot: Arc<Mutex<Option<gridpulse_core::ListenerRef>>> = Arc::new(Mutex::new(None));
    let sub = {
        let count = Arc::clone(&count);
        let slot = Arc::clone(&slot);
        t.on(move |cfg| {
            cfg.events(move |events: &[TableListenerEvent]| {
                count.lock().unwrap().push(events.len());
                if let Some(r) = slot.lock().unwrap().as_ref() {
                    r.unsubscribe();
                }
            });
        })
        .unwrap()
    };
    *slot.lock().unwrap() = Some(sub);

    t.set(&header("A"), 0, 1i64).unwrap();
    t.set(&header("A"), 0, 2i64).unwrap();
    assert_eq!(*count.lock().unwrap(), vec![1]);
}

#[test]
fn listener_metadata_is_readable_after_subscribe() {
    let t = Table::new_detached("t");
    let sub = t
        .on(|cfg| {
            cfg.name("meta").order(3).allow_loop(true);
        })
        .unwrap();
    assert_eq!(sub.name().unwrap().as_deref(), Some("meta"));
    assert_eq!(sub.order().unwrap(), 3);
    assert!(sub.allow_loop().unwrap());
}

// Scenario: a summing listener (order 10, loop-tolerant) maintains a
// "Sums" column from every other column's writes; a cell listener on the
// sum observes each intermediate total in order.
#[test]
fn summing_listener_cascades_to_a_cell_listener() {
    let t = Table::new_detached("t");
    let sums = header("Sums");

    {
        let inner = t.clone();
        let sums = sums.clone();
        t.on(move |cfg| {
            cfg.name("summer")
                .order(10)
                .allow_loop(true)
                .events(move |events: &[TableListenerEvent]| {
                    for e in events {
                        if e.new.column.header == sums {
                            continue;
                        }
                        let total = int(&inner.get(&sums, 0)) + int(&e.new.value);
                        inner.set(&sums, 0, total).unwrap();
                    }
                });
        })
        .unwrap();
    }

    let observed: Log<i64> = log();
    {
        let observed = Arc::clone(&observed);
        t.cell(&sums, 0)
            .unwrap()
            .on(move |cfg| {
                cfg.events(move |events: &[TableListenerEvent]| {
                    for e in events {
                        observed.lock().unwrap().push(int(&e.new.value));
                    }
                });
            })
            .unwrap();
    }

    t.set(&header("A"), 0, 5i64).unwrap();
    t.set(&header("B"), 0, 7i64).unwrap();

    assert_eq!(int(&t.get(&sums, 0)), 12);
    assert_eq!(*observed.lock().unwrap(), vec![5, 12]);
}

#[test]
fn cross_table_writes_from_a_callback_reach_the_other_tables_listeners() {
    let source = Table::new_detached("source");
    let mirror = Table::new_detached("mirror");

    {
        let mirror = mirror.clone();
        source
            .on(move |cfg| {
                cfg.events(move |events: &[TableListenerEvent]| {
                    for e in events {
                        mirror
                            .set(&e.new.column.header, e.new.index, e.new.value.clone())
                            .unwrap();
                    }
                });
            })
            .unwrap();
    }

    let seen: Log<i64> = log();
    {
        let seen = Arc::clone(&seen);
        mirror
            .on(move |cfg| {
                cfg.events(move |events: &[TableListenerEvent]| {
                    for e in events {
                        seen.lock().unwrap().push(int(&e.new.value));
                    }
                });
            })
            .unwrap();
    }

    source.set(&header("A"), 0, 42i64).unwrap();
    assert_eq!(int(&mirror.get(&header("A"), 0)), 42);
    assert_eq!(*seen.lock().unwrap(), vec![42]);
}

#[test]
fn big_numeric_values_flow_through_events() -> anyhow::Result<()> {
    use bigdecimal::BigDecimal;
    use num_bigint::BigInt;
    use std::str::FromStr;

    let t = Table::new_detached("t");
    let seen: Log<CellValue> = log();
    {
        let seen = Arc::clone(&seen);
        t.on(move |cfg| {
            cfg.events(move |events: &[TableListenerEvent]| {
                for e in events {
                    seen.lock().unwrap().push(e.new.value.clone());
                }
            });
        })?;
    }

    let big = BigInt::from_str("123456789012345678901234567890")?;
    let precise = BigDecimal::from_str("0.100000000000000000000000000001")?;
    t.set(&header("A"), 0, big.clone())?;
    t.set(&header("A"), 1, precise.clone())?;

    assert_eq!(t.get(&header("A"), 0), CellValue::BigInt(big.clone()));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![CellValue::BigInt(big), CellValue::BigDecimal(precise)]
    );
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn dispatch_visits_listeners_in_key_order(
        orders in proptest::collection::vec(-100i64..100, 1..12),
    ) {
        let t = Table::new_detached("t");
        let seen: Log<usize> = log();
        for (i, &order) in orders.iter().enumerate() {
            let seen = Arc::clone(&seen);
            t.on(move |cfg| {
                cfg.order(order).events(move |_| seen.lock().unwrap().push(i));
            })
            .unwrap();
        }

        t.set(&header("A"), 0, 1i64).unwrap();

        // Stable sort by order models "ascending order, ties by
        // registration sequence".
        let mut expected: Vec<usize> = (0..orders.len()).collect();
        expected.sort_by_key(|&i| orders[i]);
        prop_assert_eq!(seen.lock().unwrap().clone(), expected);
    }
}

#[test]
fn failed_pass_leaves_the_thread_reusable() {
    let t = Table::new_detached("t");
    let inner = t.clone();
    let sub = t
        .on(move |cfg| {
            cfg.events(move |_| {
                inner.set(&header("A"), 0, 1i64).unwrap();
            });
        })
        .unwrap();

    assert!(t.set(&header("A"), 0, 0i64).is_err());
    sub.unsubscribe();

    // The guard cleared the dispatch state: a later mutation on this
    // thread runs a fresh pass.
    t.set(&header("A"), 0, 9i64).unwrap();
    assert_eq!(int(&t.get(&header("A"), 0)), 9);
}

//! End-to-end batch scenarios against the scripted executor

use std::sync::Arc;
use std::time::Duration;

use procbatch::testing::{ScriptBuilder, ScriptedExecutor, column};
use procbatch::{
    BatchConfig, BatchError, BatchTarget, CommandBehavior, Gate, GateSet, LoadBalancedConnection,
    ParameterDefinition, PhysicalConnection, ProgramDefinition, ProgramMapping, ProgramResolver,
    SqlBatch, SqlProgram, SqlType, Value, parameters,
};
use tokio_util::sync::CancellationToken;

fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("procbatch=debug".parse().unwrap()),
            )
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// A program mapped identically onto every given connection string
fn program(
    definition: ProgramDefinition,
    connections: &[&str],
    gate: Option<&Gate>,
) -> Arc<dyn ProgramResolver> {
    let definition = Arc::new(definition);
    let mut program = SqlProgram::new(definition.name.clone());
    for connection_string in connections {
        let mut connection = PhysicalConnection::new(*connection_string);
        if let Some(gate) = gate {
            connection = connection.with_semaphore(gate.clone());
        }
        program = program.with_mapping(ProgramMapping::new(definition.clone(), connection));
    }
    Arc::new(program)
}

fn create_order(connections: &[&str]) -> Arc<dyn ProgramResolver> {
    program(
        ProgramDefinition::new("sales", "CreateOrder")
            .with_parameter(ParameterDefinition::input("@Customer", SqlType::NVarChar))
            .with_parameter(ParameterDefinition::output("@OrderId", SqlType::Int)),
        connections,
        None,
    )
}

fn order_lines(connections: &[&str]) -> Arc<dyn ProgramResolver> {
    program(
        ProgramDefinition::new("sales", "OrderLines")
            .with_parameter(ParameterDefinition::input("@OrderId", SqlType::Int)),
        connections,
        None,
    )
}

fn with_lines(script: ScriptBuilder) -> ScriptBuilder {
    script.result_set(
        vec![column("line", SqlType::Int), column("sku", SqlType::NVarChar)],
        vec![
            vec![Value::Int32(1), Value::String("A-1".into())],
            vec![Value::Int32(2), Value::String("B-2".into())],
            vec![Value::Int32(3), Value::String("C-3".into())],
        ],
    )
}

fn single(connection_string: &str) -> [BatchTarget; 1] {
    [BatchTarget::new(0, connection_string)]
}

#[tokio::test]
async fn test_consumer_receives_the_produced_value() {
    initialize_logging();

    let mut batch = SqlBatch::new();
    let order_id = batch.declare_output();
    let created = batch.add_non_query(
        create_order(&["a"]),
        CommandBehavior::empty(),
        Some(parameters(move |p| {
            p.set("@Customer", "ACME")?.produce("@OrderId", order_id)?;
            Ok(())
        })),
    );
    let skus = batch.add_reader_with(
        order_lines(&["a"]),
        CommandBehavior::empty(),
        Some(parameters(move |p| {
            p.consume("@OrderId", order_id)?;
            Ok(())
        })),
        |reader| {
            Box::pin(async move {
                let mut skus = Vec::new();
                while reader.read().await? {
                    skus.push(reader.get_string(1)?);
                }
                Ok(skus)
            })
        },
    );

    let script = ScriptBuilder::new()
        .statement_completed(1)
        .outputs(vec![Value::Int32(77)])
        .end_command();
    let script = with_lines(script).end_command().build();
    let executor = ScriptedExecutor::new().with_script("a", script);

    let outcome = batch
        .execute(&executor, &single("a"), &CancellationToken::new())
        .await
        .unwrap();
    outcome.into_result().unwrap();

    assert_eq!(created.get(0), Some(1));
    assert_eq!(batch.output_value(order_id, 0), Some(Value::Int32(77)));
    assert_eq!(
        skus.get(0),
        Some(vec!["A-1".to_string(), "B-2".to_string(), "C-3".to_string()])
    );

    let request = &executor.requests()[0];
    assert!(request.sql.contains("@OrderId = @P2 OUT;"));
    assert!(request.sql.contains("IF (ISNULL(@Cmd0Success,0) <> 1)"));
    assert!(request.sql.contains("EXECUTE [sales].[OrderLines] @OrderId = @P2;"));
    assert_eq!(request.parameters.len(), 2);
}

#[tokio::test]
async fn test_failed_producer_aborts_its_consumer() {
    initialize_logging();

    let mut batch = SqlBatch::new();
    let order_id = batch.declare_output();
    let before = batch.add_scalar::<i32>(order_lines(&["a"]), CommandBehavior::empty(), None);
    let created = batch.add_non_query(
        create_order(&["a"]),
        CommandBehavior::empty(),
        Some(parameters(move |p| {
            p.produce("@OrderId", order_id)?;
            Ok(())
        })),
    );
    let lines = batch.add_reader(
        order_lines(&["a"]),
        CommandBehavior::empty(),
        Some(parameters(move |p| {
            p.consume("@OrderId", order_id)?;
            Ok(())
        })),
        |reader| {
            Box::pin(async move {
                while reader.read().await? {}
                Ok(())
            })
        },
    );

    let script = ScriptBuilder::new()
        .result_set(vec![column("n", SqlType::Int)], vec![vec![Value::Int32(5)]])
        .end_command()
        .error("Batch command 1 failed: Violation of PRIMARY KEY constraint")
        .build();
    let executor = ScriptedExecutor::new().with_script("a", script);

    let outcome = batch
        .execute(&executor, &single("a"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.is_success());
    let failure = outcome.target(0).unwrap().error().unwrap();
    assert!(matches!(failure, BatchError::Driver(msg) if msg.contains("command 1")));

    assert_eq!(before.get(0), Some(5));
    assert!(created.is_empty());
    assert!(lines.is_empty());
    assert_eq!(batch.output_value(order_id, 0), None);
}

#[tokio::test]
async fn test_non_query_sums_completion_counts() {
    let mut batch = SqlBatch::new();
    let affected = batch.add_non_query(order_lines(&["a"]), CommandBehavior::empty(), None);

    let script = ScriptBuilder::new()
        .statement_completed(3)
        .result_set(vec![column("ignored", SqlType::Int)], vec![vec![Value::Int32(0)]])
        .statement_completed(2)
        .end_command()
        .build();
    let executor = ScriptedExecutor::new().with_script("a", script);

    batch
        .execute(&executor, &single("a"), &CancellationToken::new())
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(affected.get(0), Some(5));
}

#[tokio::test]
async fn test_non_query_without_completion_counts_reports_zero() {
    let mut batch = SqlBatch::new();
    let affected = batch.add_non_query(order_lines(&["a"]), CommandBehavior::empty(), None);

    // Drivers that cannot see row counts record only the markers
    let script = ScriptBuilder::new().end_command().build();
    let executor = ScriptedExecutor::new().with_script("a", script);

    let outcome = batch
        .execute(&executor, &single("a"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.targets[0].result.is_ok());
    assert_eq!(affected.get(0), Some(0));
}

#[tokio::test]
async fn test_single_row_reader_then_close() {
    let mut batch = SqlBatch::new();
    let observed = batch.add_reader_with(
        order_lines(&["a"]),
        CommandBehavior::SINGLE_ROW,
        None,
        |reader| {
            Box::pin(async move {
                let first = reader.read().await?;
                let line = reader.get_i32(0)?;
                let second = reader.read().await?;
                reader.close();
                let value_closed = matches!(
                    reader.get_value(0).map(|_| ()),
                    Err(BatchError::ReaderClosed { .. })
                );
                let read_closed = reader.read().await.is_err();
                Ok((first, line, second, value_closed && read_closed))
            })
        },
    );
    let after = batch.add_scalar::<i64>(order_lines(&["a"]), CommandBehavior::empty(), None);

    let script = with_lines(ScriptBuilder::new())
        .end_command()
        .result_set(vec![column("total", SqlType::BigInt)], vec![vec![Value::Int64(3)]])
        .end_command()
        .build();
    let executor = ScriptedExecutor::new().with_script("a", script);

    batch
        .execute(&executor, &single("a"), &CancellationToken::new())
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(observed.get(0), Some((true, 1, false, true)));
    assert_eq!(after.get(0), Some(3));
}

#[tokio::test]
async fn test_single_result_reader_leaves_the_rest_to_the_batch() {
    let mut batch = SqlBatch::new();
    let results = batch.add_reader_with(
        order_lines(&["a"]),
        CommandBehavior::SINGLE_RESULT,
        None,
        |reader| {
            Box::pin(async move {
                let mut sets = 1;
                while reader.next_result().await? {
                    sets += 1;
                }
                Ok(sets)
            })
        },
    );
    let after = batch.add_scalar::<String>(order_lines(&["a"]), CommandBehavior::empty(), None);

    let script = with_lines(ScriptBuilder::new());
    let script = with_lines(script)
        .end_command()
        .result_set(
            vec![column("s", SqlType::NVarChar)],
            vec![vec![Value::String("next".into())]],
        )
        .end_command()
        .build();
    let executor = ScriptedExecutor::new().with_script("a", script);

    batch
        .execute(&executor, &single("a"), &CancellationToken::new())
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(results.get(0), Some(1));
    assert_eq!(after.get(0).as_deref(), Some("next"));
}

#[tokio::test]
async fn test_shared_gate_is_acquired_once_per_target() {
    let connection_gate = Gate::connection("orders-conn", 1);
    let database_gate = Gate::database("orders-db", 4);
    let pool = Arc::new(LoadBalancedConnection::new("orders").with_database_semaphore(database_gate.clone()));
    let definition = Arc::new(ProgramDefinition::new("sales", "Touch"));
    let touch: Arc<dyn ProgramResolver> = Arc::new(
        SqlProgram::new("Touch")
            .with_mapping(
                ProgramMapping::new(
                    definition.clone(),
                    PhysicalConnection::new("a").with_semaphore(connection_gate.clone()),
                )
                .with_load_balanced(pool.clone()),
            )
            .with_mapping(
                ProgramMapping::new(
                    definition,
                    PhysicalConnection::new("b").with_semaphore(connection_gate.clone()),
                )
                .with_load_balanced(pool),
            ),
    );

    let mut batch = SqlBatch::new();
    for _ in 0..3 {
        batch.add_non_query(touch.clone(), CommandBehavior::empty(), None);
    }
    let script = ScriptBuilder::new()
        .end_command()
        .end_command()
        .end_command()
        .build();
    let executor = ScriptedExecutor::new()
        .with_script("a", script.clone())
        .with_script("b", script);

    let outcome = batch
        .execute(
            &executor,
            &[BatchTarget::new(0, "a"), BatchTarget::new(1, "b")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(connection_gate.acquisitions(), 2);
    assert_eq!(database_gate.acquisitions(), 2);
    assert_eq!(connection_gate.available(), 1);
    assert_eq!(database_gate.available(), 4);
}

#[tokio::test]
async fn test_targets_are_isolated() {
    initialize_logging();

    let mut batch = SqlBatch::new();
    let count = batch.add_scalar::<i32>(order_lines(&["a", "b", "c"]), CommandBehavior::empty(), None);

    let script = |n: i32| {
        ScriptBuilder::new()
            .result_set(vec![column("n", SqlType::Int)], vec![vec![Value::Int32(n)]])
            .end_command()
            .build()
    };
    let executor = ScriptedExecutor::new()
        .with_script("a", script(10))
        .with_failure("b", "login failed")
        .with_script("c", script(30));
    let targets = [
        BatchTarget::new(2, "c"),
        BatchTarget::new(0, "a"),
        BatchTarget::new(1, "b"),
    ];

    let outcome = batch
        .execute(&executor, &targets, &CancellationToken::new())
        .await
        .unwrap();

    let ordinals: Vec<_> = outcome.targets.iter().map(|t| t.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);
    let failures: Vec<_> = outcome.failures().map(|(ordinal, _)| ordinal).collect();
    assert_eq!(failures, vec![1]);

    assert_eq!(count.get(0), Some(10));
    assert_eq!(count.get(1), None);
    assert_eq!(count.get(2), Some(30));
    assert_eq!(executor.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_discards_results_and_releases_gates() {
    let gate = Gate::connection("conn", 1);
    let first = program(ProgramDefinition::new("dbo", "First"), &["a"], Some(&gate));
    let stuck = program(ProgramDefinition::new("dbo", "Stuck"), &["a"], Some(&gate));

    let mut batch = SqlBatch::new();
    let value = batch.add_scalar::<i32>(first, CommandBehavior::empty(), None);
    let never = batch.add_reader(stuck, CommandBehavior::empty(), None, |_| {
        Box::pin(async {
            std::future::pending::<()>().await;
            Ok(())
        })
    });

    let script = ScriptBuilder::new()
        .result_set(vec![column("n", SqlType::Int)], vec![vec![Value::Int32(1)]])
        .end_command()
        .end_command()
        .build();
    let executor = ScriptedExecutor::new().with_script("a", script);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = batch.execute(&executor, &single("a"), &cancel).await.unwrap();

    assert!(outcome.target(0).unwrap().is_cancelled());
    assert!(value.is_empty());
    assert!(never.is_empty());
    assert_eq!(gate.available(), 1);
    assert_eq!(gate.acquisitions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_while_executing() {
    let gate = Gate::database("db", 1);
    let mut batch = SqlBatch::new();
    let value = batch.add_scalar::<i32>(
        program(ProgramDefinition::new("dbo", "Slow"), &["a"], Some(&gate)),
        CommandBehavior::empty(),
        None,
    );
    let executor = ScriptedExecutor::new().with_hang("a");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = batch.execute(&executor, &single("a"), &cancel).await.unwrap();

    assert!(outcome.target(0).unwrap().is_cancelled());
    assert!(value.is_empty());
    assert_eq!(gate.available(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gate_timeout_fails_only_that_target() {
    let gate = Gate::connection("busy", 1);
    let mut held = GateSet::new();
    held.insert(gate.clone());
    let _guard = held
        .acquire(Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap();

    let config = BatchConfig::new().with_gate_acquire_timeout_ms(100);
    let mut batch = SqlBatch::with_config(config);
    batch.add_non_query(
        program(ProgramDefinition::new("dbo", "Gated"), &["a"], Some(&gate)),
        CommandBehavior::empty(),
        None,
    );
    let executor =
        ScriptedExecutor::new().with_script("a", ScriptBuilder::new().end_command().build());

    let outcome = batch.execute(&executor, &single("a"), &CancellationToken::new()).await.unwrap();

    assert!(matches!(
        outcome.target(0).unwrap().error(),
        Some(BatchError::Timeout(_))
    ));
    assert_eq!(executor.request_count(), 0);
}

#[tokio::test]
async fn test_xml_reader() {
    let mut batch = SqlBatch::new();
    let document = batch.add_xml_reader(order_lines(&["a"]), CommandBehavior::empty(), None);
    let roots = batch.add_xml_reader_with(
        order_lines(&["a"]),
        CommandBehavior::empty(),
        None,
        |doc| doc.top_level_elements(),
    );

    let script = ScriptBuilder::new()
        .result_set(
            vec![column("XML_F52E2B61-18A1-11d1-B105-00805F49916B", SqlType::NText)],
            vec![
                vec![Value::String("<line n=\"1\"/>".into())],
                vec![Value::String("<line n=\"2\"/>".into())],
            ],
        )
        .end_command()
        .result_set(
            vec![column("doc", SqlType::Xml)],
            vec![vec![Value::Xml("<order><line/></order>".into())]],
        )
        .end_command()
        .build();
    let executor = ScriptedExecutor::new().with_script("a", script);

    batch
        .execute(&executor, &single("a"), &CancellationToken::new())
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let document = document.get(0).unwrap();
    assert!(document.is_fragment());
    assert_eq!(document.as_str(), "<line n=\"1\"/><line n=\"2\"/>");
    assert_eq!(roots.get(0), Some(vec!["order".to_string()]));
}

#[tokio::test]
async fn test_xml_shape_mismatch_fails_only_its_command() {
    initialize_logging();

    let mut batch = SqlBatch::new();
    let document = batch.add_xml_reader(order_lines(&["a"]), CommandBehavior::empty(), None);
    let after = batch.add_scalar::<i32>(order_lines(&["a"]), CommandBehavior::empty(), None);

    let script = with_lines(ScriptBuilder::new())
        .end_command()
        .result_set(vec![column("n", SqlType::Int)], vec![vec![Value::Int32(7)]])
        .end_command()
        .build();
    let executor = ScriptedExecutor::new().with_script("a", script);

    let outcome = batch
        .execute(&executor, &single("a"), &CancellationToken::new())
        .await
        .unwrap();

    let target = outcome.target(0).unwrap();
    assert!(matches!(
        target.error(),
        Some(BatchError::InvalidOperation(msg)) if msg.contains("exactly one column")
    ));
    assert_eq!(target.failed_commands, vec![0]);
    assert!(document.is_empty());
    assert_eq!(after.get(0), Some(7));
}

#[tokio::test]
async fn test_failing_reader_callback_keeps_later_results() {
    let mut batch = SqlBatch::new();
    let order_id = batch.declare_output();
    let rejected = batch.add_reader_with(
        create_order(&["a"]),
        CommandBehavior::empty(),
        Some(parameters(move |p| {
            p.produce("@OrderId", order_id)?;
            Ok(())
        })),
        |reader| {
            Box::pin(async move {
                reader.read().await?;
                reader.get::<i32>(5)
            })
        },
    );
    let lines = batch.add_reader_with(
        order_lines(&["a"]),
        CommandBehavior::empty(),
        Some(parameters(move |p| {
            p.consume("@OrderId", order_id)?;
            Ok(())
        })),
        |reader| {
            Box::pin(async move {
                let mut count = 0;
                while reader.read().await? {
                    count += 1;
                }
                Ok(count)
            })
        },
    );

    let script = ScriptBuilder::new()
        .result_set(vec![column("status", SqlType::Int)], vec![vec![Value::Int32(1)]])
        .outputs(vec![Value::Int32(77)])
        .end_command();
    let script = with_lines(script).end_command().build();
    let executor = ScriptedExecutor::new().with_script("a", script);

    let outcome = batch
        .execute(&executor, &single("a"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.target(0).unwrap().failed_commands, vec![0]);
    assert!(rejected.is_empty());
    assert_eq!(batch.output_value(order_id, 0), Some(Value::Int32(77)));
    assert_eq!(lines.get(0), Some(3));
}

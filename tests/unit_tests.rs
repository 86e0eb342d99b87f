use clap::Parser;
use span_balance::source::RetryPolicy;
use span_balance::{ConsumeArgs, OutputFormat, PopulateArgs};
use std::time::Duration;

#[test]
fn test_consume_args_defaults() {
    let args = ConsumeArgs::try_parse_from([
        "consume",
        "--brokers",
        "localhost:9092",
        "--topic",
        "spans",
    ]);
    let args = tokio_test::assert_ok!(args);

    assert_eq!(args.consumer.brokers, vec!["localhost:9092"]);
    assert_eq!(args.consumer.topic, "spans");
    assert_eq!(args.consumer.group_id, "span-balance");
    assert_eq!(args.consumer.claim_buffer_size, 1000);
    assert_eq!(args.output, OutputFormat::Json);
    assert_eq!(args.consumer.retry_policy(), RetryPolicy::unlimited());
}

#[test]
fn test_consume_args_output_none() {
    let args = ConsumeArgs::try_parse_from([
        "consume",
        "--brokers",
        "localhost:9092",
        "--topic",
        "spans",
        "--output",
        "none",
        "--group-id",
        "dashboards",
    ])
    .unwrap();

    assert_eq!(args.output, OutputFormat::None);
    assert_eq!(args.consumer.group_id, "dashboards");
}

#[test]
fn test_consume_args_bounded_retries() {
    let args = ConsumeArgs::try_parse_from([
        "consume",
        "--brokers",
        "a:9092,b:9092",
        "--topic",
        "spans",
        "--max-session-failures",
        "10",
        "--retry-delay-ms",
        "1000",
    ])
    .unwrap();

    assert_eq!(args.consumer.bootstrap_servers(), "a:9092,b:9092");
    assert_eq!(
        args.consumer.retry_policy(),
        RetryPolicy::bounded(10, Duration::from_secs(1))
    );
}

#[test]
fn test_consume_args_rejects_unknown_output() {
    let args = ConsumeArgs::try_parse_from([
        "consume",
        "--brokers",
        "localhost:9092",
        "--topic",
        "spans",
        "--output",
        "xml",
    ]);

    assert!(args.is_err());
}

#[test]
fn test_populate_args() {
    let args = PopulateArgs::try_parse_from([
        "populate",
        "--brokers",
        "kafka-1:9092,kafka-2:9092",
        "--topic",
        "spans",
        "--count",
        "250",
    ])
    .unwrap();

    assert_eq!(args.bootstrap_servers(), "kafka-1:9092,kafka-2:9092");
    assert_eq!(args.topic, "spans");
    assert_eq!(args.count, 250);
    assert_eq!(args.partitions, 3);
}

#[test]
fn test_populate_args_creation() {
    let args = PopulateArgs {
        brokers: vec!["localhost:9092".to_string()],
        topic: "spans".to_string(),
        count: 10,
        partitions: 1,
    };

    assert_eq!(args.bootstrap_servers(), "localhost:9092");
    assert_eq!(args.count, 10);
}

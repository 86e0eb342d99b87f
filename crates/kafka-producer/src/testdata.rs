//! Test data publishing helpers for Kafka integration tests
//!
//! Generates plausible client/server spans with a small vocabulary of
//! services, operations and tags, so consumers see the same strings repeat.

use crate::SpanProducer;
use anyhow::Result;
use chrono::{TimeDelta, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use span_types::{Id, Span, Timestamp, Timings};
use std::collections::HashMap;
use std::sync::Arc;

const SERVICES: &[&str] = &["frontend", "checkout", "payments", "inventory", "shipping"];
const OPERATIONS: &[&str] = &[
    "GET /cart",
    "POST /checkout",
    "authorize",
    "reserve-stock",
    "quote-shipping",
];
const REGIONS: &[&str] = &["eu-west-1", "us-east-1", "ap-south-1"];
const STATUS_CODES: &[&str] = &["200", "200", "200", "201", "404", "500"];

/// Generate a random span. Roughly one in four is a trace root.
pub fn random_span<R: Rng + ?Sized>(rng: &mut R) -> Span {
    let trace = nonzero_id(rng);
    let parent = if rng.random_bool(0.25) {
        Id::default()
    } else {
        nonzero_id(rng)
    };

    let timestamp = Timestamp::from(Utc::now());
    let nanos = rng.random_range(50i64..500_000) * 1_000;
    let duration = TimeDelta::nanoseconds(nanos);
    let end = timestamp.as_nanos() + nanos;

    // Server receive/send fall inside the client window.
    let network = nanos / 10;
    let timings = Timings {
        cs: Some(timestamp),
        cr: Some(Timestamp(end)),
        sr: Some(Timestamp(timestamp.as_nanos() + network)),
        ss: Some(Timestamp(end - network)),
    };

    let mut tags = HashMap::new();
    tags.insert(Arc::from("region"), pick(rng, REGIONS));
    tags.insert(Arc::from("http.status_code"), pick(rng, STATUS_CODES));

    Span {
        id: nonzero_id(rng),
        parent,
        trace,
        name: pick(rng, OPERATIONS),
        service: pick(rng, SERVICES),
        timestamp,
        duration,
        timings,
        tags,
    }
}

/// Publish `count` random spans and return how many were published
pub async fn publish_test_spans(
    producer: &SpanProducer,
    topic: &str,
    count: usize,
) -> Result<usize> {
    let spans: Vec<Span> = {
        let mut rng = rand::rng();
        (0..count).map(|_| random_span(&mut rng)).collect()
    };

    for (published, span) in spans.iter().enumerate() {
        producer.publish_span(topic, span).await?;
        if (published + 1) % 1000 == 0 {
            tracing::info!("Published {} of {count} spans", published + 1);
        }
    }

    tracing::debug!("Published {count} test spans to {topic}");
    Ok(count)
}

fn nonzero_id<R: Rng + ?Sized>(rng: &mut R) -> Id {
    Id::from_u64(rng.random_range(1..=u64::MAX))
}

fn pick<R: Rng + ?Sized>(rng: &mut R, values: &[&str]) -> Arc<str> {
    Arc::from(values.choose(rng).copied().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use span_types::{SpanDecoder, SpanEncoder};

    #[test]
    fn test_random_span_is_well_formed() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..100 {
            let span = random_span(&mut rng);
            assert!(!span.id.is_zero());
            assert!(!span.trace.is_zero());
            assert!(SERVICES.contains(&span.service.as_ref()));
            assert!(OPERATIONS.contains(&span.name.as_ref()));
            assert!(span.duration > TimeDelta::zero());

            let cs = span.timings.cs.unwrap();
            let cr = span.timings.cr.unwrap();
            let sr = span.timings.sr.unwrap();
            let ss = span.timings.ss.unwrap();
            assert!(cs <= sr && sr <= ss && ss <= cr);
            assert!(span.tag("region").is_some());
        }
    }

    #[test]
    fn test_random_spans_include_roots() {
        let mut rng = StdRng::seed_from_u64(42);
        let roots = (0..200).filter(|_| random_span(&mut rng).is_root()).count();
        assert!(roots > 0 && roots < 200);
    }

    #[test]
    fn test_random_span_survives_encoding() {
        let mut rng = StdRng::seed_from_u64(1);
        let span = random_span(&mut rng);

        let bytes = SpanEncoder::new().unwrap().encode_span(&span).unwrap();
        let decoded = SpanDecoder::new().unwrap().decode(&bytes).unwrap();

        assert_eq!(decoded, span);
    }
}

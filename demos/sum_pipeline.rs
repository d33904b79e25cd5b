//! Number processing process demonstrating filtering and transformations
//!
//! Process:
//! 1. Generate: Produces numbers 1-100 as rows
//! 2. Filter: Keep only even numbers
//! 3. Transform: Multiply by 10
//! 4. Aggregate: Sum all numbers, and count them on a second branch
//!
//! Usage: cargo run --example sum_pipeline --release

use etl_pipeline::{
    Emitter, FilterNode, FoldNode, NodeContext, NodeRef, PipelineError, Process, ProcessSettings,
    Result as PipelineResult, Row, SourceNode, TransformNode,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn value(row: &Row) -> PipelineResult<u64> {
    row.get("value")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| PipelineError::node("row has no numeric value"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("Number Processing Process");
    println!("=========================");
    println!("Generate 1-100 -> Filter evens -> Multiply by 10 -> Sum");
    println!();

    let settings = ProcessSettings::builder()
        .name("sum_pipeline")
        .pool::<Row>(128, true)
        .build()?;
    let mut process = Process::new(settings);

    let generator = NodeRef::new(SourceNode::new(
        "generator",
        |emitter: &Emitter<Row>, _ctx: &NodeContext| {
            for n in 1..=100u64 {
                emitter.emit(Row::new().with("value", n.to_string()))?;
            }
            Ok(())
        },
    ));
    let evens = NodeRef::new(FilterNode::new("even_filter", |row: &Row| {
        value(row).map(|n| n % 2 == 0).unwrap_or(false)
    }));
    let multiply = NodeRef::new(TransformNode::new(
        "multiplier",
        |row: Row, _ctx: &NodeContext| {
            let n = value(&row)?;
            Ok(Row::new().with("value", (n * 10).to_string()))
        },
    ));
    let sum = NodeRef::new(FoldNode::new("sum", 0u64, |total: &mut u64, row: Row| {
        *total += value(&row)?;
        Ok(())
    }));
    let count = NodeRef::new(FoldNode::new("count", 0u64, |count: &mut u64, _row: Row| {
        *count += 1;
        Ok(())
    }));

    process.attach_input_to_output(&generator, &evens)?;
    process.attach_input_to_output(&evens, &multiply)?;
    process.attach_input_to_output(&multiply, &sum)?;
    process.attach_input_to_output(&multiply, &count)?;

    let report = process.execute()?;

    println!();
    println!("Processed {} numbers", count.lock().state());
    println!("Sum: {}", sum.lock().state());
    println!("Expected: {}", (2..=100u64).step_by(2).map(|n| n * 10).sum::<u64>());
    println!();
    print!("{}", report.format());

    Ok(())
}

//! Word frequency counter process
//!
//! Reads lines from stdin, splits them into words, counts frequencies, and
//! prints the top-N words. A second branch counts the lines.
//!
//! Usage: cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)

use etl_pipeline::{
    Emitter, FoldNode, InputNode, InputPort, Node, NodeContext, NodeRef, OutputNode, OutputPort,
    Process, ProcessSettings, Result as PipelineResult, Row, SourceNode,
};
use std::collections::HashMap;
use std::io::{self, BufRead};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Node that splits each line into cleaned, lowercase words
struct WordSplitter {
    min_len: usize,
    input: InputPort<Row>,
    output: OutputPort<Row>,
}

impl WordSplitter {
    fn new(min_len: usize) -> Self {
        Self {
            min_len,
            input: InputPort::new(),
            output: OutputPort::new(),
        }
    }
}

impl Node for WordSplitter {
    fn execute(&mut self, ctx: &NodeContext) -> PipelineResult<()> {
        let emitter = self.output.get(ctx)?;
        for line in self.input.take(ctx)? {
            let text = line.get("line").unwrap_or_default();
            for word in text.split_whitespace() {
                let cleaned: String = word
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase();
                if cleaned.len() >= self.min_len {
                    emitter.emit(Row::new().with("word", cleaned))?;
                }
            }
        }
        emitter.signal_end();
        Ok(())
    }

    fn name(&self) -> &str {
        "word_splitter"
    }
}

impl InputNode for WordSplitter {
    type Input = Row;

    fn input_port(&mut self) -> &mut InputPort<Row> {
        &mut self.input
    }
}

impl OutputNode for WordSplitter {
    type Output = Row;

    fn set_emitter(&mut self, emitter: Emitter<Row>) {
        self.output.set(emitter);
    }
}

fn top_n(counts: &HashMap<String, usize>, n: usize) -> Vec<(&str, usize)> {
    let mut items: Vec<_> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    items.into_iter().take(n).collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("Word Frequency Counter Process");
    println!("==============================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let settings = ProcessSettings::builder().name("word_count").build()?;
    let mut process = Process::new(settings);

    let reader = NodeRef::new(SourceNode::new(
        "stdin_reader",
        |emitter: &Emitter<Row>, _ctx: &NodeContext| {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => emitter.emit(Row::new().with("line", line))?,
                    Err(e) => {
                        tracing::warn!("Stopped reading stdin: {}", e);
                        break;
                    }
                }
            }
            Ok(())
        },
    ));
    let splitter = NodeRef::new(WordSplitter::new(3));
    let counter = NodeRef::new(FoldNode::new(
        "word_counter",
        HashMap::<String, usize>::new(),
        |counts: &mut HashMap<String, usize>, row: Row| {
            if let Some(word) = row.get("word") {
                *counts.entry(word.to_owned()).or_insert(0) += 1;
            }
            Ok(())
        },
    ));
    let lines = NodeRef::new(FoldNode::new("line_counter", 0usize, |n: &mut usize, _row: Row| {
        *n += 1;
        Ok(())
    }));

    process.attach_input_to_output(&reader, &splitter)?;
    process.attach_input_to_output(&reader, &lines)?;
    process.attach_input_to_output(&splitter, &counter)?;

    let report = process.execute()?;

    let counter = counter.lock();
    println!("\n=== Top 10 Words ({} lines) ===", lines.lock().state());
    for (i, (word, count)) in top_n(counter.state(), 10).iter().enumerate() {
        println!("{:2}. {} ({})", i + 1, word, count);
    }
    println!();
    print!("{}", report.format());

    Ok(())
}

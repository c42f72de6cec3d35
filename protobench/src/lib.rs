//! protobench times how fast protowire serializes and parses a message.
//!
//! Each benchmark warms up once, then doubles its iteration count until a run takes at least the
//! minimum sample time, then scales the count so that one final run takes about the target time.
//! The final run is what gets reported.

use std::fmt::{Display, Formatter};
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use guacamole::combinators::any;
use guacamole::Guacamole;
use indicio::{clue, ERROR, INFO};
use protowire::{
    unittest, Builder, DynamicMessage, ExtensionRegistry, FieldDescriptor, FieldType, Message,
    MessageBuilder, MessageDescriptor, Value,
};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static BENCHMARKS: biometrics::Counter = biometrics::Counter::new("protobench.benchmarks");
static ITERATIONS: biometrics::Counter = biometrics::Counter::new("protobench.iterations");
static FAILED: biometrics::Counter = biometrics::Counter::new("protobench.failed");
static THROUGHPUT: biometrics::Moments = biometrics::Moments::new("protobench.mb_per_sec");

/// Register this crate's sensors, and protowire's, with `collector`.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&BENCHMARKS);
    collector.register_counter(&ITERATIONS);
    collector.register_counter(&FAILED);
    collector.register_moments(&THROUGHPUT);
    protowire::register_biometrics(collector);
}

///////////////////////////////////////////// indicio //////////////////////////////////////////////

pub static COLLECTOR: indicio::Collector = indicio::Collector::new();

////////////////////////////////////////////// Error ///////////////////////////////////////////////

/// Why a test case failed.
#[derive(Debug)]
pub enum Error {
    Codec { what: protowire::Error },
    Io { what: String },
    UnknownSchema { name: String },
    InvalidSeed { seed: String },
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Codec { what } => write!(f, "{what}"),
            Error::Io { what } => write!(f, "i/o error: {what}"),
            Error::UnknownSchema { name } => write!(f, "no schema named {name}"),
            Error::InvalidSeed { seed } => write!(f, "cannot use {seed:?} as a seed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<protowire::Error> for Error {
    fn from(what: protowire::Error) -> Self {
        Error::Codec { what }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            what: err.to_string(),
        }
    }
}

///////////////////////////////////////// ProtoBenchOptions ////////////////////////////////////////

/// How long to sample and how long to run.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "command_line", derive(arrrg_derive::CommandLine))]
pub struct ProtoBenchOptions {
    #[cfg_attr(
        feature = "command_line",
        arrrg(
            optional,
            "Milliseconds a sample must take before it is scaled to the target."
        )
    )]
    pub min_sample_ms: u64,
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Milliseconds the final, scaled run should take.")
    )]
    pub target_ms: u64,
    #[cfg_attr(
        feature = "command_line",
        arrrg(
            flag,
            "Treat each input as a guacamole seed and generate a message instead of reading a file."
        )
    )]
    pub generate: bool,
    #[cfg_attr(feature = "command_line", arrrg(flag, "Log every benchmark to stdout."))]
    pub verbose: bool,
}

impl Default for ProtoBenchOptions {
    fn default() -> Self {
        Self {
            min_sample_ms: 2_000,
            target_ms: 30_000,
            generate: false,
            verbose: false,
        }
    }
}

//////////////////////////////////////////// BenchResult ///////////////////////////////////////////

/// The final, scaled run of one benchmark.
#[derive(Clone, Debug, PartialEq)]
pub struct BenchResult {
    pub name: &'static str,
    pub iterations: u64,
    pub elapsed: Duration,
    pub mb_per_sec: f64,
}

impl Display for BenchResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} iterations in {:.3}s; {:.3}MB/s",
            self.name,
            self.iterations,
            self.elapsed.as_secs_f64(),
            self.mb_per_sec
        )
    }
}

///////////////////////////////////////////// benchmark ////////////////////////////////////////////

fn time_action<F: FnMut() -> Result<(), Error>>(
    action: &mut F,
    iterations: u64,
) -> Result<Duration, Error> {
    let start = Instant::now();
    for _ in 0..iterations {
        action()?;
    }
    ITERATIONS.count(iterations);
    Ok(start.elapsed())
}

/// Time `action`, which processes `data_size` bytes per call.
pub fn benchmark<F: FnMut() -> Result<(), Error>>(
    name: &'static str,
    data_size: usize,
    options: &ProtoBenchOptions,
    mut action: F,
) -> Result<BenchResult, Error> {
    BENCHMARKS.click();
    let min_sample = Duration::from_millis(options.min_sample_ms);
    let target = Duration::from_millis(options.target_ms);
    action()?;
    let mut iterations = 1u64;
    let mut elapsed = time_action(&mut action, iterations)?;
    while elapsed < min_sample {
        iterations = iterations.saturating_mul(2);
        elapsed = time_action(&mut action, iterations)?;
    }
    // scale in floating point; the product can exceed what fits in an integer
    let sampled = elapsed.as_secs_f64().max(1e-9);
    let scaled = target.as_secs_f64() / sampled * iterations as f64;
    let iterations = (scaled as u64).max(1);
    let elapsed = time_action(&mut action, iterations)?;
    let secs = elapsed.as_secs_f64();
    let mb_per_sec = if secs > 0.0 {
        (iterations as f64 * data_size as f64) / (secs * 1024.0 * 1024.0)
    } else {
        0.0
    };
    THROUGHPUT.add(mb_per_sec);
    let result = BenchResult {
        name,
        iterations,
        elapsed,
        mb_per_sec,
    };
    clue!(COLLECTOR, INFO, {
        benchmark: name,
        iterations: iterations,
        elapsed_secs: secs,
        mb_per_sec: mb_per_sec,
    });
    Ok(result)
}

/// Run the four codec benchmarks against `sample`, which was parsed from `input`.
pub fn run_message<M: Message>(
    sample: &M,
    input: &[u8],
    registry: &ExtensionRegistry,
    options: &ProtoBenchOptions,
) -> Result<Vec<BenchResult>, Error> {
    let size = input.len();
    let mut results = Vec::with_capacity(4);
    results.push(benchmark("Serialize to byte vector", size, options, || {
        black_box(sample.serialize());
        Ok(())
    })?);
    results.push(benchmark("Serialize to writer", size, options, || {
        let mut out = Vec::new();
        sample.write_to(&mut out)?;
        black_box(out);
        Ok(())
    })?);
    results.push(benchmark("Deserialize from byte slice", size, options, || {
        let mut builder = sample.new_builder();
        builder.merge_from_bytes(input, registry)?;
        black_box(builder.build());
        Ok(())
    })?);
    results.push(benchmark("Deserialize from reader", size, options, || {
        let mut reader = input;
        let mut builder = sample.new_builder();
        builder.merge_from_reader(&mut reader, registry)?;
        black_box(builder.build());
        Ok(())
    })?);
    Ok(results)
}

/// Parse `input` as `schema` and benchmark the result.  Any error fails the whole test case.
pub fn run_test(
    schema: &str,
    input: &[u8],
    options: &ProtoBenchOptions,
) -> Result<Vec<BenchResult>, Error> {
    clue!(COLLECTOR, INFO, {
        start: schema,
        input_bytes: input.len() as u64,
    });
    let result = run_schema(schema, input, options);
    if let Err(err) = &result {
        FAILED.click();
        let what = err.to_string();
        clue!(COLLECTOR, ERROR, {
            failed: schema,
            error: what,
        });
    }
    result
}

fn run_schema(
    schema: &str,
    input: &[u8],
    options: &ProtoBenchOptions,
) -> Result<Vec<BenchResult>, Error> {
    let descriptor = schema_by_name(schema)?;
    let registry = unittest::registry()?;
    let sample = protowire::deserialize(&descriptor, input, &registry)?;
    run_message(&sample, input, &registry, options)
}

////////////////////////////////////////////// inputs //////////////////////////////////////////////

/// The reference schema called `name`.
pub fn schema_by_name(name: &str) -> Result<Arc<MessageDescriptor>, Error> {
    unittest::by_name(name)?.ok_or_else(|| Error::UnknownSchema {
        name: name.to_string(),
    })
}

/// The bytes to benchmark for one (schema, input) pair:  the file at `input`, or, when
/// generating, a message of `schema` generated from the seed `input`.
pub fn load_input(schema: &str, input: &str, options: &ProtoBenchOptions) -> Result<Vec<u8>, Error> {
    if options.generate {
        let seed = input.parse::<u64>().map_err(|_| Error::InvalidSeed {
            seed: input.to_string(),
        })?;
        let descriptor = schema_by_name(schema)?;
        let mut guac = Guacamole::new(seed);
        Ok(generate_message(&descriptor, &mut guac, 3)?.serialize())
    } else {
        Ok(std::fs::read(input)?)
    }
}

/// A random message of type `descriptor`.  Nested messages go at most `depth` levels deep.
pub fn generate_message(
    descriptor: &Arc<MessageDescriptor>,
    guac: &mut Guacamole,
    depth: usize,
) -> Result<DynamicMessage, protowire::Error> {
    let mut builder = MessageBuilder::new(Arc::clone(descriptor));
    for field in descriptor.fields() {
        if any::<u8>(guac) & 1 == 0 {
            continue;
        }
        let count = if field.is_repeated() {
            any::<u8>(guac) % 4
        } else {
            1
        };
        for _ in 0..count {
            let Some(value) = generate_value(field, guac, depth)? else {
                break;
            };
            if field.is_repeated() {
                builder.add_repeated(field.number().get(), value)?;
            } else {
                builder.set_field(field.number().get(), value)?;
            }
        }
    }
    Ok(builder.build())
}

fn generate_value(
    field: &FieldDescriptor,
    guac: &mut Guacamole,
    depth: usize,
) -> Result<Option<Value>, protowire::Error> {
    let len = (any::<u8>(guac) % 32) as usize;
    Ok(Some(match field.field_type() {
        FieldType::Double => Value::F64(any::<f64>(guac)),
        FieldType::Float => Value::F32(any::<f32>(guac)),
        FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64 => Value::I64(any(guac)),
        FieldType::UInt64 | FieldType::Fixed64 => Value::U64(any(guac)),
        FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32 => Value::I32(any(guac)),
        FieldType::UInt32 | FieldType::Fixed32 => Value::U32(any(guac)),
        FieldType::Bool => Value::Bool(any::<u8>(guac) & 1 == 1),
        FieldType::Enum => Value::Enum(1 + (any::<u8>(guac) % 3) as i32),
        FieldType::String => {
            let s: String = (0..len)
                .map(|_| (b'a' + any::<u8>(guac) % 26) as char)
                .collect();
            Value::String(s)
        }
        FieldType::Bytes => {
            let mut bytes = vec![0u8; len];
            guac.generate(&mut bytes);
            Value::Bytes(bytes)
        }
        FieldType::Message | FieldType::Group => {
            let Some(message_type) = field.message_type() else {
                return Ok(None);
            };
            if depth == 0 {
                return Ok(None);
            }
            Value::Message(generate_message(message_type, guac, depth - 1)?)
        }
    }))
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////

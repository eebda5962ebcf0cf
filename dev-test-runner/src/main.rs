//! Dev runner: infer Avro schemas from JSON/NDJSON fixtures and push every
//! document through the framed serde path.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use avro_reflect::dynamic::infer_descriptor;
use avro_reflect::{
    Deserializer, DynamicNaming, Engine, MemoryRegistry, ReflectDeserializer, ReflectSerializer, SchemaRegistry,
    Serializer,
};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Parser, Debug)]
struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// infer and print the Avro schema shared by all inputs
    Schema(SchemaOut),
    /// serialize and deserialize every document through a mock registry
    RoundTrip(RoundTrip),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// record name of the inferred root type
    #[arg(long, default_value = "Root")]
    root_type: String,

    /// namespace of inferred record names
    #[arg(long)]
    namespace: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(Args, Debug)]
struct SchemaOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// output .avsc file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RoundTrip {
    #[command(flatten)]
    input_settings: InputSettings,

    #[arg(long, default_value = "dev-test-runner")]
    topic: String,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn naming(&self) -> DynamicNaming {
        DynamicNaming { namespace: self.namespace.clone(), root: self.root_type.clone() }
    }

    fn load(&self) -> anyhow::Result<Vec<Value>> {
        let mut docs = Vec::new();
        for path in resolve_file_path_patterns(&self.input)? {
            let source =
                std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
            if self.ndjson {
                for (line_no, line) in source.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
                    let doc = serde_json::from_str(line)
                        .with_context(|| format!("{}:{}: invalid JSON", path.display(), line_no + 1))?;
                    docs.push(doc);
                }
            } else {
                let doc =
                    serde_json::from_str(&source).with_context(|| format!("{}: invalid JSON", path.display()))?;
                docs.push(doc);
            }
        }
        tracing::info!(documents = docs.len(), "loaded inputs");
        Ok(docs)
    }
}

impl CommandLineInterface {
    fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Schema(target) => {
                let docs = target.input_settings.load()?;
                let engine = Engine::new();
                let descriptor = infer_descriptor(&docs, &target.input_settings.naming())?;
                let schema_src = engine.synthesize(&descriptor)?.to_pretty_string();
                match target.out.as_ref() {
                    Some(out) => {
                        if let Some(parent) = out.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::write(out, &schema_src)?;
                    }
                    None => println!("{schema_src}"),
                }
                Ok(())
            }
            Command::RoundTrip(target) => round_trip(target),
        }
    }
}

fn round_trip(target: &RoundTrip) -> anyhow::Result<()> {
    let docs = target.input_settings.load()?;
    let engine = Arc::new(Engine::new());
    let registry: Arc<dyn SchemaRegistry> = Arc::new(MemoryRegistry::new());

    // read and write with the schema joined over every document, not the first one
    let descriptor = infer_descriptor(&docs, &target.input_settings.naming())?;
    let serializer = ReflectSerializer::<Value>::new()
        .with_engine(Arc::clone(&engine))
        .with_registry(Arc::clone(&registry))
        .with_descriptor(&descriptor)?;
    let deserializer =
        ReflectDeserializer::<Value>::new().with_engine(engine).with_registry(registry).with_descriptor(&descriptor)?;
    if let Some(schema) = serializer.writer_schema() {
        println!("{}", schema.to_pretty_string());
    }

    let mut failures = 0usize;
    for (i, doc) in docs.iter().enumerate() {
        let decoded = serializer
            .serialize(&target.topic, Some(doc))
            .and_then(|framed| deserializer.deserialize(&target.topic, framed.as_deref()));
        match decoded {
            Ok(Some(back)) if back == *doc => {}
            Ok(other) => {
                failures += 1;
                tracing::error!(document = i, ?other, "round trip changed the document");
            }
            Err(error) => {
                failures += 1;
                tracing::error!(document = i, %error, "round trip failed");
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} documents failed to round trip", docs.len());
    }
    println!("{} documents round tripped", docs.len());
    Ok(())
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }
    Ok(out)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();
    CommandLineInterface::parse().run()
}

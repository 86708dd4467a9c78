use jsonschema::JSONSchema;
use serde_json::Value;

/// Job request schema, embedded at build time
static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/job_request.json"));

pub fn load_schema() -> JSONSchema {
    let schema: Value = serde_json::from_str(SCHEMA).expect("Valid JSON");
    JSONSchema::compile(&schema).expect("Valid schema")
}

//! Shared fixtures for runner integration tests.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde_json::{json, Value};

/// Write a 1x1 RGB PNG carrying the given `tEXt` chunks.
pub fn write_png(path: &Path, chunks: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut encoder = png::Encoder::new(BufWriter::new(file), 1, 1);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    for (keyword, text) in chunks {
        encoder
            .add_text_chunk(keyword.to_string(), text.to_string())
            .unwrap();
    }
    let mut writer = encoder.write_header().unwrap();
    writer.write_image_data(&[0, 0, 0]).unwrap();
    writer.finish().unwrap();
}

/// Write a PNG whose `prompt` chunk holds `workflow`.
pub fn write_workflow_png(path: &Path, workflow: &Value) {
    write_png(path, &[("prompt", &workflow.to_string())]);
}

/// Minimal API-format workflow with one checkpoint and optional LoRAs.
pub fn workflow(checkpoint: &str, loras: &[&str]) -> Value {
    let mut graph = json!({
        "4": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": checkpoint }
        },
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "seed": 1234,
                "steps": 20,
                "cfg": 7.0,
                "sampler_name": "euler",
                "model": ["4", 0]
            }
        }
    });
    for (i, lora) in loras.iter().enumerate() {
        graph[format!("{}", 10 + i)] = json!({
            "class_type": "LoraLoader",
            "inputs": { "lora_name": lora, "strength_model": 1.0, "strength_clip": 1.0 }
        });
    }
    graph
}

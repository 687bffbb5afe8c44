use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "loop": {
                "type": "object",
                "properties": {
                    "iterations": { "type": "integer", "minimum": 1 },
                    "local_move_limit": { "type": "integer", "minimum": 0 },
                    "max_patch_retries": { "type": "integer", "minimum": 1 }
                }
            },
            "budget": {
                "allOf": [
                    { "$ref": "#/$defs/limits" },
                    {
                        "type": "object",
                        "properties": {
                            "ceiling": { "$ref": "#/$defs/limits" }
                        }
                    }
                ]
            },
            "retry": {
                "type": "object",
                "properties": {
                    "max_retries": { "type": "integer", "minimum": 0, "maximum": 10 },
                    "base_delay_ms": { "type": "integer", "minimum": 0 }
                }
            },
            "toolchain": {
                "type": "object",
                "properties": {
                    "backend": { "type": "string", "enum": ["local", "container"] },
                    "klee": { "type": "string" },
                    "ktest_tool": { "type": "string" },
                    "llvm_link": { "type": "string" },
                    "llvm_nm": { "type": "string" },
                    "klee_args": { "type": "array", "items": { "type": "string" } },
                    "grace_secs": { "type": "integer", "minimum": 0 },
                    "image": { "type": "string" },
                    "container_name": { "type": "string" }
                }
            },
            "llm": {
                "type": "object",
                "properties": {
                    "provider": { "type": "string", "enum": ["anthropic", "openai", "local"] },
                    "model": { "type": "string" },
                    "api_key": { "type": "string" },
                    "base_url": { "type": "string" },
                    "max_tokens": { "type": "integer", "minimum": 256 },
                    "temperature": { "type": "number", "minimum": 0, "maximum": 2 }
                }
            },
            "output": {
                "type": "object",
                "properties": {
                    "directory": { "type": "string" }
                }
            },
            "batch": {
                "type": "object",
                "properties": {
                    "concurrency": { "type": "integer", "minimum": 1 }
                }
            }
        },
        "$defs": {
            "limits": {
                "type": "object",
                "properties": {
                    "time_secs": { "type": "integer", "minimum": 1 },
                    "max_memory_mb": { "type": "integer", "minimum": 1 },
                    "max_instructions": { "type": "integer", "minimum": 1 },
                    "build_timeout_secs": { "type": "integer", "minimum": 1 }
                }
            }
        }
    })
});

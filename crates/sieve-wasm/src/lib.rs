//! WebAssembly bindings for sieve
//!
//! Rules cross the boundary as JSON strings in the declarative wire shape,
//! ready to hand to the browser's rule engine.

use wasm_bindgen::prelude::*;

use sieve_core::ids::{static_list_window, IdRange, STATIC_IDS};
use sieve_core::types::Rule;

fn to_json(rules: &impl serde::Serialize) -> Result<String, JsValue> {
    serde_json::to_string(rules).map_err(|e| JsValue::from_str(&format!("Serialization failed: {}", e)))
}

fn string_array(value: &JsValue, what: &str) -> Result<Vec<String>, JsValue> {
    js_sys::Array::from(value)
        .iter()
        .map(|v| {
            v.as_string()
                .ok_or_else(|| JsValue::from_str(&format!("{} must be strings", what)))
        })
        .collect()
}

/// Compile one filter. Rejections are thrown as their message.
#[wasm_bindgen]
pub fn parse_filter(filter: &str, id: u32) -> Result<String, JsValue> {
    let rule = sieve_compiler::parse_filter(filter, id)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    to_json(&rule)
}

/// Compile a whole list into ids `[id_base, id_base + capacity)`.
#[wasm_bindgen]
pub fn compile_filter_list(text: &str, id_base: u32, capacity: u32) -> Result<JsValue, JsValue> {
    let window = IdRange::new(id_base, id_base.saturating_add(capacity));
    compile_into(text, window)
}

/// Compile list `index` of `count` lists sharing the static id range.
#[wasm_bindgen]
pub fn compile_static_list(text: &str, index: u32, count: u32) -> Result<JsValue, JsValue> {
    let window = static_window(index, count).map_err(|e| JsValue::from_str(&e))?;
    compile_into(text, window)
}

fn static_window(index: u32, count: u32) -> Result<IdRange, String> {
    if index >= count {
        return Err(format!("List index {} out of range for {} lists", index, count));
    }
    let window = static_list_window(index as usize, count as usize);
    if window.is_empty() || !STATIC_IDS.contains_range(&window) {
        return Err(format!("No static id window for list {} of {}", index, count));
    }
    Ok(window)
}

fn compile_into(text: &str, window: IdRange) -> Result<JsValue, JsValue> {
    let compiled = sieve_compiler::compile_filter_list(text, window);
    let stats = &compiled.stats;

    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"rules".into(), &JsValue::from_str(&to_json(&compiled.rules)?));
    let _ = js_sys::Reflect::set(&result, &"lines".into(), &JsValue::from(stats.lines as u32));
    let _ = js_sys::Reflect::set(&result, &"ruleCount".into(), &JsValue::from(stats.rules as u32));
    let _ = js_sys::Reflect::set(&result, &"cosmetic".into(), &JsValue::from(stats.cosmetic as u32));
    let _ = js_sys::Reflect::set(&result, &"unsupported".into(), &JsValue::from(stats.unsupported as u32));
    let _ = js_sys::Reflect::set(&result, &"duplicates".into(), &JsValue::from(stats.duplicates as u32));
    let _ = js_sys::Reflect::set(&result, &"truncated".into(), &JsValue::from(stats.truncated as u32));
    Ok(result.into())
}

/// Session-tier allow rules for an array of whitelisted domains.
#[wasm_bindgen]
pub fn whitelist_rules(domains: JsValue) -> Result<String, JsValue> {
    let domains = string_array(&domains, "Domains")?;
    let normalized = sieve_compiler::normalize_whitelist(&domains);
    let rules: Vec<Rule> = sieve_compiler::whitelist_rules(&normalized);
    to_json(&rules)
}

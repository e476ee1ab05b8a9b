use sapper as sp;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub fn load_board(code: String) -> Result<String, String> {
    console_error_panic_hook::set_once();

    let engine = sp::Engine::from_code(&code).map_err(|e| e.to_string())?;
    Ok(engine.encode())
}

#[wasm_bindgen]
pub fn reveal_cell(code: String, x: u8, y: u8) -> Result<String, String> {
    console_error_panic_hook::set_once();

    let mut engine = sp::Engine::from_code(&code).map_err(|e| e.to_string())?;
    let safe = engine
        .reveal(sp::Coord::new(x, y))
        .map_err(|e| e.to_string())?;
    let mut out = engine.encode();
    out.push(if safe { '+' } else { '-' });
    Ok(out)
}

#[wasm_bindgen]
pub fn list_regions(code: String) -> Result<String, String> {
    console_error_panic_hook::set_once();

    let mut engine = sp::Engine::from_code(&code).map_err(|e| e.to_string())?;
    engine
        .generate_and_apply_to_fixpoint()
        .map_err(|e| e.to_string())?;
    let lines: Vec<String> = engine
        .list_regions()
        .into_iter()
        .map(|(_, r)| format!("{} {:?}", r.kind, r.elements))
        .collect();
    Ok(lines.join("\n"))
}

#[wasm_bindgen]
pub fn is_determinable(code: String, x: u8, y: u8) -> Result<bool, String> {
    console_error_panic_hook::set_once();

    let engine = sp::Engine::from_code(&code).map_err(|e| e.to_string())?;
    engine
        .is_determinable(sp::Coord::new(x, y))
        .map_err(|e| e.to_string())
}

#[wasm_bindgen]
pub fn is_solvable(code: String) -> Result<bool, String> {
    console_error_panic_hook::set_once();

    let engine = sp::Engine::from_code(&code).map_err(|e| e.to_string())?;
    engine.is_solvable().map_err(|e| e.to_string())
}

#[wasm_bindgen]
pub fn check_rule(bytes: Vec<u8>) -> Result<String, String> {
    console_error_panic_hook::set_once();

    let rule = sp::RuleCode::from_bytes(&bytes)
        .and_then(sp::RuleCode::into_rule)
        .map_err(|e| e.to_string())?;
    let verdict = sp::check_rule(&rule).map_err(|e| e.to_string())?;
    Ok(verdict.label().to_string())
}

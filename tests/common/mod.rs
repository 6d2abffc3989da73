//! Common test utilities - scripted engines and stock combatants

#![allow(dead_code)]

use combatd::combat::{CombatEngine, Combatant, ScriptedDice};

/// Engine whose dice come up as the given faces, in order
pub fn scripted(faces: impl IntoIterator<Item = u32>) -> CombatEngine<ScriptedDice> {
    CombatEngine::new(ScriptedDice::new(faces))
}

/// Combatant with a fixed initiative die so no dice are consumed at start
pub fn fighter(name: &str, initiative: u32) -> Combatant {
    Combatant::new(name, 20, 15).with_initiative_roll(initiative)
}

/// Three combatants with descending initiative: Aria, Borin, Cade
pub fn party() -> Vec<Combatant> {
    vec![fighter("Aria", 18), fighter("Borin", 12), fighter("Cade", 6)]
}

/// Names in turn order
pub fn order_names(combat: &combatd::Combat) -> Vec<String> {
    combat.combatants().map(|c| c.name.clone()).collect()
}

/*!
 # Effect presets for LEDDMX strips

 The controller firmware ships a fixed catalogue of animations selected by a
 one-byte code. Names follow the controller app's "code:Label" convention,
 except for the automatic cycle which uses the reserved code 255.
*/

/// Pseudo-effect that clears the active effect and returns to a static color
pub const EFFECT_NONE: &str = "None";

/// Name of the automatic cycle effect
pub const EFFECT_AUTO: &str = "AUTO";

/// Predefined effects with their command values
pub const EFFECTS: &[(&str, u8)] = &[
    (EFFECT_AUTO, 0xff),
    ("1:Forward Dreaming", 1),
    ("2:Backward Dreaming", 2),
    ("80:Strobe White", 80),
];

/// Looks up the command byte for an effect name
///
/// Returns `None` for unknown names and for [`EFFECT_NONE`], which has no code.
pub fn effect_code(name: &str) -> Option<u8> {
    EFFECTS
        .iter()
        .find(|(effect, _)| *effect == name)
        .map(|(_, code)| *code)
}

/// All selectable effect names, starting with [`EFFECT_NONE`]
pub fn effect_list() -> Vec<&'static str> {
    std::iter::once(EFFECT_NONE)
        .chain(EFFECTS.iter().map(|(name, _)| *name))
        .collect()
}

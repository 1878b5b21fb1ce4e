//! Item codes known to the event jobs.

pub const WOOD: &str = "WOOD";
pub const AXE: &str = "AXE";
pub const COOP_POINT: &str = "COOP_POINT";
pub const EMPTY_GIFTBOX: &str = "EMPTY_GIFTBOX";
pub const AVERAGE_EGG: &str = "AVERAGE_EGG";
pub const RARE_EGG: &str = "RARE_EGG";
pub const LEGENDARY_EGG: &str = "LEGENDARY_EGG";
pub const TOXIC_EGG: &str = "TOXIC_EGG";

/// Eggs the fox steals and hands back on a lucky pet.
pub const STOLEN_EGGS: [&str; 4] = [AVERAGE_EGG, RARE_EGG, LEGENDARY_EGG, TOXIC_EGG];

/// Codes that can be dropped, picked up and gifted.
const USABLE: &[&str] = &[
    WOOD,
    AXE,
    EMPTY_GIFTBOX,
    AVERAGE_EGG,
    RARE_EGG,
    LEGENDARY_EGG,
    TOXIC_EGG,
];

pub fn is_usable(item_code: &str) -> bool {
    USABLE.contains(&item_code)
}

pub fn is_egg(item_code: &str) -> bool {
    item_code.ends_with("_EGG")
}

/// Normalise user input such as `rare egg` or `Rare_Egg` to `RARE_EGG`.
pub fn interpret(input: &str) -> String {
    input
        .trim()
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// State key holding the number of `item_code` eggs the fox has stolen.
pub fn stolen_key(item_code: &str) -> String {
    format!("stolen_{}", item_code.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_normalises_input() {
        assert_eq!(interpret("rare egg"), "RARE_EGG");
        assert_eq!(interpret("  Legendary_egg "), "LEGENDARY_EGG");
        assert_eq!(interpret("empty-giftbox"), "EMPTY_GIFTBOX");
        assert_eq!(interpret("WOOD"), "WOOD");
    }

    #[test]
    fn test_usable_and_eggs() {
        assert!(is_usable(RARE_EGG));
        assert!(!is_usable(COOP_POINT));
        assert!(is_egg(TOXIC_EGG));
        assert!(!is_egg(AXE));
    }

    #[test]
    fn test_stolen_key() {
        assert_eq!(stolen_key(AVERAGE_EGG), "stolen_average_egg");
    }
}

use boardwalk_core::PlayerInfo;
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

const ADJECTIVES: &[&str] = &[
    "Sandy", "Salty", "Sunny", "Breezy", "Tidal", "Coral", "Foamy", "Drifting", "Pebbly", "Balmy",
];

const CRITTERS: &[&str] = &[
    "Crab", "Gull", "Pelican", "Seal", "Otter", "Starfish", "Turtle", "Dolphin", "Sandpiper",
    "Heron",
];

/// Number of distinct player colors clients render.
pub const PALETTE_SIZE: u8 = 12;

/// A fresh identity for one connection.
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> PlayerInfo {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Sandy");
    let critter = CRITTERS.choose(rng).copied().unwrap_or("Crab");
    PlayerInfo {
        id: Uuid::new_v4().to_string(),
        name: format!("{adjective} {critter}"),
        color: rng.gen_range(0..PALETTE_SIZE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test_timeout::timeout]
    fn players_get_unique_ids_and_palette_colors() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = generate(&mut rng);
        let b = generate(&mut rng);
        assert_ne!(a.id, b.id);
        assert!(a.color < PALETTE_SIZE && b.color < PALETTE_SIZE);
        assert_eq!(a.name.split(' ').count(), 2);
    }
}

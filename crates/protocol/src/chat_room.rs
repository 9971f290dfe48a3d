use serde::{Deserialize, Serialize};

/// Chat room type; gates which client message types are admissible (`§4.6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatRoomType {
    Regular,
    MassPublic,
    MassPrivate,
}

impl ChatRoomType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Regular),
            2 => Some(Self::MassPublic),
            3 => Some(Self::MassPrivate),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::Regular => 1,
            Self::MassPublic => 2,
            Self::MassPrivate => 3,
        }
    }

    /// Whether a sender must appear in the room's membership set to post.
    /// `MASS_PUBLIC` rooms admit anyone; all other room types enforce
    /// membership.
    pub fn requires_membership(self) -> bool {
        !matches!(self, Self::MassPublic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_legacy_integer_encoding() {
        for ty in [
            ChatRoomType::Regular,
            ChatRoomType::MassPublic,
            ChatRoomType::MassPrivate,
        ] {
            assert_eq!(ChatRoomType::from_i32(ty.as_i32()), Some(ty));
        }
    }

    #[test]
    fn only_mass_public_skips_membership_checks() {
        assert!(ChatRoomType::Regular.requires_membership());
        assert!(ChatRoomType::MassPrivate.requires_membership());
        assert!(!ChatRoomType::MassPublic.requires_membership());
    }
}

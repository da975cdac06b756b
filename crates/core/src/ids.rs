use std::fmt;

use uuid::Uuid;

// Keeps every id wrapper structurally identical.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }
    };
}

define_id!(SpaceId);
define_id!(MessageId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique() {
        let first = SpaceId::new_v7();
        let second = SpaceId::new_v7();
        assert_ne!(first, second);
        assert_eq!(first.to_string().len(), 36);
        assert_eq!(first.to_string().as_bytes()[14], b'7');
    }
}

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier from anything string-like.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is empty or whitespace.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of the paying user, owned by the user service.
    UserId
);

string_id!(
    /// Gateway transaction identifier; the natural idempotency key of a payment.
    TransactionId
);

string_id!(
    /// Identifier of a product in the product service.
    ProductId
);

string_id!(
    /// Identifier of a receipt created by the receipt service.
    ReceiptId
);

string_id!(
    /// Identifier of an order created by the order service.
    OrderId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = TransactionId::new("TX-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"TX-1\"");

        let back: TransactionId = serde_json::from_str("\"TX-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn blank_detection() {
        assert!(UserId::new("  ").is_blank());
        assert!(!UserId::new("u-1").is_blank());
    }

    #[test]
    fn display_matches_inner_value() {
        assert_eq!(ReceiptId::from("r-9").to_string(), "r-9");
        assert_eq!(OrderId::new(String::from("o-3")).as_str(), "o-3");
    }
}

//! Typed ID definitions for laundry records.

use crate::define_id;

// =============================================================================
// Laundry records
// =============================================================================

define_id!(ClientId, "cli");
define_id!(OrderId, "ord");
define_id!(MachineId, "mch");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_order_id_roundtrip() {
        let id = OrderId::new();
        let s = id.to_string();
        let parsed: OrderId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_machine_id_prefix() {
        let id = MachineId::new();
        assert!(id.to_string().starts_with("mch_"));
    }

    #[test]
    fn test_order_id_rejects_machine_prefix() {
        let machine = MachineId::new().to_string();
        let result: Result<OrderId, _> = machine.parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { expected: "ord", .. }
        ));
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<OrderId, _> = "ord01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_empty() {
        let result: Result<MachineId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<MachineId, _> = "mch_invalid".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidUlid(_)
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let id = MachineId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with("\"mch_"));
        let parsed: MachineId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_order_ids_sortable() {
        let id1 = OrderId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = OrderId::new();
        assert!(id1 < id2);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            ClientId::PREFIX,
            OrderId::PREFIX,
            MachineId::PREFIX,
            RequestId::PREFIX,
        ];
        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_from_ulid_roundtrips(raw in any::<u128>()) {
            let id = OrderId::from_ulid(crate::Ulid(raw));
            let parsed = OrderId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(id, parsed);
        }

        #[test]
        fn prop_parse_never_panics(s in "\\PC*") {
            let _ = MachineId::parse(&s);
        }
    }
}

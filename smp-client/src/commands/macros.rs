/// Binds a command struct to its `(operation, group, command id)` triple and
/// its response type.
macro_rules! impl_command {
    ((read, $group:ident, $id:literal): $cmd:ty => $resp:ty) => {
        $crate::commands::macros::impl_command!(@impl
            $crate::header::Operation::Read, $group, $id, $cmd, $resp);
    };
    ((write, $group:ident, $id:literal): $cmd:ty => $resp:ty) => {
        $crate::commands::macros::impl_command!(@impl
            $crate::header::Operation::Write, $group, $id, $cmd, $resp);
    };
    (@impl $op:expr, $group:ident, $id:literal, $cmd:ty, $resp:ty) => {
        impl $crate::commands::McuMgrCommand for $cmd {
            type Response = $resp;
            const OPERATION: $crate::header::Operation = $op;
            const GROUP: $crate::Group = $crate::Group::$group;
            const COMMAND_ID: u8 = $id;
        }
    };
}
pub(crate) use impl_command;

/// Serializes a fieldless request struct as an empty CBOR map.
macro_rules! impl_serialize_as_empty_map {
    ($t:ty) => {
        impl serde::Serialize for $t {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                use serde::ser::SerializeMap;
                serializer.serialize_map(Some(0))?.end()
            }
        }
    };
}
pub(crate) use impl_serialize_as_empty_map;

/// Deserializes a fieldless response struct from a CBOR map, ignoring all
/// entries (devices may include `rc: 0`).
macro_rules! impl_deserialize_from_empty_map_and_into_unit {
    ($t:ty) => {
        impl<'de> serde::Deserialize<'de> for $t {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                struct MapVisitor;

                impl<'de> serde::de::Visitor<'de> for MapVisitor {
                    type Value = $t;

                    fn expecting(
                        &self,
                        formatter: &mut std::fmt::Formatter<'_>,
                    ) -> std::fmt::Result {
                        formatter.write_str("a map")
                    }

                    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
                    where
                        A: serde::de::MapAccess<'de>,
                    {
                        while map
                            .next_entry::<serde::de::IgnoredAny, serde::de::IgnoredAny>()?
                            .is_some()
                        {}
                        Ok(Default::default())
                    }
                }

                deserializer.deserialize_map(MapVisitor)
            }
        }
    };
}
pub(crate) use impl_deserialize_from_empty_map_and_into_unit;

/// Checks that a command encodes to the given CBOR map, carries the given
/// registry triple, and that its response decodes from the given CBOR map.
#[cfg(test)]
macro_rules! command_encode_decode_test {
    ($name:ident, ($op:expr, $group:expr, $id:expr), $cmd:expr, $cmd_cbor:expr, $resp_cbor:expr, $resp:expr,) => {
        #[test]
        fn $name() {
            let cmd = $cmd;
            assert_eq!(
                $crate::commands::test_support::registry_of(&cmd),
                ($op, $group, $id),
            );

            let mut encoded = vec![];
            ciborium::into_writer(&cmd, &mut encoded).unwrap();
            let encoded_value: ciborium::Value =
                ciborium::from_reader(encoded.as_slice()).unwrap();
            assert_eq!(encoded_value, $cmd_cbor.unwrap());

            let mut response_bytes = vec![];
            ciborium::into_writer(&$resp_cbor.unwrap(), &mut response_bytes).unwrap();
            let decoded =
                $crate::commands::test_support::decode_response_of(&cmd, &response_bytes);
            assert_eq!(decoded, $resp);
        }
    };
}
#[cfg(test)]
pub(crate) use command_encode_decode_test;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use lvp_core::MachineId;
use proptest::prelude::*;

use crate::{decode, encode, read_message, write_message, Request};

proptest! {
    #[test]
    fn arbitrary_payload_round_trips_through_length_prefix(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut buf = Vec::new();
            write_message(&mut buf, &bytes).await.unwrap();
            let mut cursor = std::io::Cursor::new(buf);
            let back = read_message(&mut cursor).await.unwrap();
            prop_assert_eq!(back, bytes);
            Ok(())
        })?;
    }

    #[test]
    fn delete_machine_request_round_trips_through_json(id_bytes in any::<[u8; 16]>()) {
        let id = MachineId::from(uuid::Uuid::from_bytes(id_bytes));
        let req = Request::DeleteMachine { id };
        let bytes = encode(&req).unwrap();
        let back: Request = decode(&bytes).unwrap();
        prop_assert_eq!(req, back);
    }
}

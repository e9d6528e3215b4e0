#![no_main]
use libfuzzer_sys::fuzz_target;

use amunchain_ledger::core::consensus::messages::ConsensusMsg;

fuzz_target!(|data: &[u8]| {
    // Untrusted gossip frames must never panic, and anything that decodes
    // must re-encode to a frame that decodes to the same message.
    if let Ok(msg) = ConsensusMsg::decode(data) {
        let frame = msg.encode().expect("decoded frame re-encodes");
        assert_eq!(ConsensusMsg::decode(&frame).ok(), Some(msg));
    }
});

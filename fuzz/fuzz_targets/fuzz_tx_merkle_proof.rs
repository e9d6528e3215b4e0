// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


#![no_main]
#![forbid(unsafe_code)]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use amunchain_ledger::core::chain::merkle::{merkle_proof, merkle_root, verify_proof};

#[derive(Clone, Debug, Arbitrary)]
struct Input {
    items: Vec<Vec<u8>>,
    index: u16,
    forged: Vec<u8>,
}

fuzz_target!(|inp: Input| {
    let root = merkle_root(&inp.items);
    if inp.items.is_empty() { return; }
    let idx = (inp.index as usize) % inp.items.len();

    if let Some(p) = merkle_proof(&inp.items, idx) {
        assert!(verify_proof(root, &inp.items[idx], &p));
        if inp.forged != inp.items[idx] {
            assert!(!verify_proof(root, &inp.forged, &p));
        }
    }
});

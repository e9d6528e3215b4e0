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

use libfuzzer_sys::fuzz_target;
use amunchain_ledger::core::tx::{Transaction, TxJson};

fuzz_target!(|data: &[u8]| {
    let Ok(json) = serde_json::from_slice::<TxJson>(data) else { return; };
    let Ok(tx) = Transaction::try_from(json) else { return; };

    // Verification is a boolean outcome on untrusted input.
    let _ = tx.verify();

    let back = Transaction::try_from(TxJson::from(&tx)).expect("rendered tx parses");
    assert_eq!(back.hash(), tx.hash());
});

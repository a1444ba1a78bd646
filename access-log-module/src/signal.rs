// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Unix signal processing

use log::{error, warn};
use tokio::runtime::Handle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::UnboundedSender;

use crate::writer::WriterMessage;

fn listen_to_signal(handle: &Handle, kind: SignalKind, sender: UnboundedSender<WriterMessage>) {
    handle.spawn(async move {
        let mut sig = match signal(kind) {
            Ok(sig) => sig,
            Err(err) => {
                warn!(
                    "Failed registering for signal {}: {err}",
                    kind.as_raw_value()
                );
                return;
            }
        };

        while sig.recv().await.is_some() {
            if let Err(err) = sender.send(WriterMessage::Reopen) {
                error!("Failed reopening log files, thread crashed? {err}");
                break;
            }
        }
    });
}

pub(crate) fn listen(sender: &UnboundedSender<WriterMessage>) {
    let Ok(handle) = Handle::try_current() else {
        warn!("No async runtime, log files won’t be reopened on HUP or USR1 signals");
        return;
    };

    listen_to_signal(&handle, SignalKind::hangup(), sender.clone());
    listen_to_signal(&handle, SignalKind::user_defined1(), sender.clone());
}

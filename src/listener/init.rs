// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use tokio::sync::mpsc;

use super::{Listener, CHANNEL_CAPACITY};
use crate::session::Session;
use crate::stream::Stream;

impl Listener {
    /// Register and spawn a session for a freshly accepted stream.
    pub(super) fn new_connection(&mut self, stream: Stream, address: std::net::SocketAddr) {
        if self.config.max_connections > 0
            && self.session_senders.len() >= self.config.max_connections
        {
            log::warn!(
                "listener {}: max_connections ({}) reached, rejecting {address}",
                self.id,
                self.config.max_connections
            );
            return;
        }

        let session_id = self.next_session_id();
        log::info!(
            "listener {}: new connection from {address}, session {session_id}",
            self.id
        );

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let session = Session::new(
            session_id,
            self.session_config,
            stream,
            self.session_sender.clone(),
            receiver,
        );
        self.session_senders.insert(session_id, sender);
        tokio::spawn(session.run_loop());
    }
}

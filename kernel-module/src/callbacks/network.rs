//! Inbound TCP traffic for app sockets.

use shared::{NetworkReport, ReportEvent};

use crate::consts::MIN_USERAPP_UID;
use crate::hooks::HookArgs;
use crate::host::{KernelHost, ReportTransport};
use crate::Thawguard;

impl<H: KernelHost, T: ReportTransport> Thawguard<H, T> {
    /// `tcp_v4_rcv(skb)` / `tcp_v6_rcv(skb)` pre-call. Not freeze-gated.
    pub(crate) fn on_tcp_rcv(&self, args: &HookArgs) {
        let Some(uid) = self.host.skb_socket_uid(args.arg(0)) else {
            return;
        };
        if uid < MIN_USERAPP_UID {
            return;
        }
        self.reporter
            .report(&ReportEvent::Network(NetworkReport { target: uid }));
    }
}

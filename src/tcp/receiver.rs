use crate::config::TcpConfig;
use crate::link::Link;
use crate::tcp::conn::Connection;
use crate::tcp::event::EventKind;
use crate::tcp::sender::raise;
use crate::tcp::state::TcpState;
use crate::tcp::tcp_flags::TcpFlags;
use crate::tcp::tcp_header::TcpPacket;
use crate::tcp::tcp_segment::Transmitter;
use crate::tcp::wrap32::Wrap32;
use log::{debug, info};

/// Advance `conn` with one inbound segment. A connection that must be destroyed is left in `Closed`.
pub(crate) fn dispatch<L: Link>(
    conn: &mut Connection<'_>,
    seg: &TcpPacket<'_>,
    tx: &mut Transmitter<L>,
    config: &TcpConfig,
    now: u64,
) {
    if seg.header.flags.contains(TcpFlags::RST) {
        on_reset(conn);
        return;
    }

    match conn.state {
        TcpState::SynSent => on_syn_sent(conn, seg, tx, config, now),
        TcpState::SynRcvd => on_syn_rcvd(conn, seg, tx, config, now),
        TcpState::Init | TcpState::TimeWait | TcpState::Closed => {
            debug!("{}: ignoring segment in {}", conn.handle, conn.state);
        }
        _ => on_segment(conn, seg, tx, config, now),
    }
}

fn on_reset(conn: &mut Connection<'_>) {
    match conn.state {
        TcpState::Init | TcpState::Closed => return,
        TcpState::SynRcvd => debug!("{}: handshake reset by {}", conn.handle, conn.remote),
        _ => {
            info!("{}: connection reset by {}", conn.handle, conn.remote);
            conn.state = TcpState::Closed;
            conn.notify(EventKind::RemoteClosed, None, false);
            return;
        }
    }
    conn.state = TcpState::Closed;
}

/// Active open: only a SYN+ACK acknowledging our SYN moves us forward.
fn on_syn_sent<L: Link>(
    conn: &mut Connection<'_>,
    seg: &TcpPacket<'_>,
    tx: &mut Transmitter<L>,
    config: &TcpConfig,
    now: u64,
) {
    let hdr = &seg.header;

    if !hdr.flags.contains(TcpFlags::SYN) {
        debug!("{}: expected SYN-ACK from {}, got {:?}", conn.handle, conn.remote, hdr.flags);
        tx.transmit_reset(conn.local, conn.remote, conn.hw, hdr.ack_no, hdr.seq_no + seg.data_len());
        conn.state = TcpState::Closed;
        conn.notify(EventKind::Closed, None, false);
        return;
    }

    if !hdr.flags.contains(TcpFlags::ACK) {
        // Simultaneous open is not supported; our SYN retransmission carries on
        debug!("{}: ignoring bare SYN from {}", conn.handle, conn.remote);
        return;
    }

    if hdr.ack_no != conn.snd_nxt {
        debug!("{}: SYN-ACK acknowledges {}, expected {}", conn.handle, hdr.ack_no, conn.snd_nxt);
        tx.transmit_reset(conn.local, conn.remote, conn.hw, hdr.ack_no, Wrap32::new(0));
        return;
    }

    conn.apply_syn(seg, config);
    establish(conn, config, now);
    conn.ack_owed = true;

    info!("{}: connected to {} (mss {})", conn.handle, conn.remote, conn.mss);
    raise(conn, tx, EventKind::NewConnection, None);
}

/// Passive open: the ACK of our SYN-ACK completes the handshake.
fn on_syn_rcvd<L: Link>(
    conn: &mut Connection<'_>,
    seg: &TcpPacket<'_>,
    tx: &mut Transmitter<L>,
    config: &TcpConfig,
    now: u64,
) {
    let hdr = &seg.header;

    if !hdr.flags.contains(TcpFlags::ACK) || hdr.flags.contains(TcpFlags::SYN) {
        // A retransmitted SYN is answered by our own SYN-ACK timer
        debug!("{}: ignoring {:?} during handshake", conn.handle, hdr.flags);
        return;
    }
    if hdr.ack_no != conn.snd_nxt {
        debug!("{}: handshake ACK {} does not match {}", conn.handle, hdr.ack_no, conn.snd_nxt);
        return;
    }

    establish(conn, config, now);

    info!("{}: connection from {} established (mss {})", conn.handle, conn.remote, conn.mss);
    if !raise(conn, tx, EventKind::NewConnection, None) {
        return;
    }

    // The handshake ACK may already carry data or FIN
    on_segment(conn, seg, tx, config, now);
}

fn establish(conn: &mut Connection<'_>, config: &TcpConfig, now: u64) {
    // First RTT sample: the SYN / SYN-ACK exchange
    conn.rtt.seed(now.saturating_sub(conn.handshake_ts), config);

    conn.snd_una = conn.snd_nxt;
    conn.snd_base = conn.snd_nxt;
    conn.state = TcpState::Established;
    conn.timer.restart(now);
}

/// Synchronized states: sequence check, acknowledgment, data delivery, FIN.
fn on_segment<L: Link>(
    conn: &mut Connection<'_>,
    seg: &TcpPacket<'_>,
    tx: &mut Transmitter<L>,
    config: &TcpConfig,
    now: u64,
) {
    let hdr = &seg.header;
    let has_ack = hdr.flags.contains(TcpFlags::ACK);

    if !has_ack && !matches!(conn.state, TcpState::FinWait1 | TcpState::FinWait2) {
        debug!("{}: segment without ACK in {}", conn.handle, conn.state);
        return;
    }
    if hdr.flags.contains(TcpFlags::SYN) {
        debug!("{}: stray SYN in {}", conn.handle, conn.state);
        conn.ack_owed = true;
        return;
    }

    // -- Sequence check; no reassembly, a gap drops the whole segment --
    let rcv_nxt = conn.rcv_nxt;
    let start = hdr.seq_no;
    let end = start + seg.data_len();
    let gap = start.after(rcv_nxt);

    let new_len = if gap { 0 } else { end.distance_from(rcv_nxt) as usize };
    // Urgent bytes sit in front of the payload and count as new data without being delivered
    let data = &seg.payload[seg.payload.len().saturating_sub(new_len)..];
    let fin = !gap && hdr.flags.contains(TcpFlags::FIN) && !end.before(rcv_nxt);

    if gap {
        debug!("{}: out-of-order segment {}, expecting {}", conn.handle, start, rcv_nxt);
        conn.ack_owed = true;
    } else if start.before(rcv_nxt) && new_len == 0 && !fin {
        debug!("{}: duplicate segment {}..{}", conn.handle, start, end);
        conn.ack_owed = true;
    }

    // -- Acknowledgment --
    if has_ack {
        let ack = hdr.ack_no;
        conn.update_window(hdr.window);

        if ack.after(conn.snd_nxt) {
            debug!("{}: ACK {} for unsent data (snd_nxt {})", conn.handle, ack, conn.snd_nxt);
            conn.ack_owed = true;
            return;
        }

        if ack.after(conn.snd_una) {
            conn.rexmit_mode = false;
            conn.rexmit_wait_ack = false;
            conn.snd_una = ack;
            if let Some(rtt) = conn.rtt.on_ack(ack, now, config) {
                debug!("{}: rtt {} ms, rto {} ms", conn.handle, rtt, conn.rtt.rto());
            }
            conn.timer.restart(now);

            let chunk_done = conn.tx.is_some_and(|buf| conn.bytes_acked() >= buf.len());
            if chunk_done {
                conn.tx = None;
                if !raise(conn, tx, EventKind::DataSent, None) {
                    return;
                }
            }
        } else if ack == conn.snd_una
            && conn.snd_nxt.after(conn.snd_una)
            && conn.tx.is_some()
            && seg.data_len() == 0
            && !hdr.flags.contains(TcpFlags::FIN)
        {
            // The peer is still asking for `snd_una`: go back and resend from there
            if !conn.rexmit_mode {
                debug!("{}: duplicate ACK {}, entering retransmission", conn.handle, ack);
                conn.rexmit_mode = true;
                conn.rexmit_wait_ack = false;
                conn.rtt.cancel();
            }
        }
    }

    // -- Data --
    if new_len > 0 {
        conn.rcv_nxt += new_len as u32;
        conn.ack_owed = true;

        if !data.is_empty() && !raise(conn, tx, EventKind::DataReceived, Some(data)) {
            return;
        }
    }

    // -- Close handshake --
    if fin {
        conn.rcv_nxt += 1;
        conn.ack_owed = true;
    }
    let fin_acked = conn.state.fin_sent() && conn.snd_una == conn.snd_nxt;

    match conn.state {
        TcpState::Established if fin => {
            info!("{}: {} is closing", conn.handle, conn.remote);
            conn.state = TcpState::CloseWait;
            raise(conn, tx, EventKind::RemoteClosing, None);
        }
        TcpState::FinWait1 if fin && fin_acked => conn.state = TcpState::TimeWait,
        TcpState::FinWait1 if fin => conn.state = TcpState::Closing,
        TcpState::FinWait1 if fin_acked => {
            conn.state = TcpState::FinWait2;
            conn.timer.restart(now);
        }
        TcpState::FinWait2 if fin => conn.state = TcpState::TimeWait,
        TcpState::Closing if fin_acked => conn.state = TcpState::TimeWait,
        TcpState::LastAck if fin_acked => {
            info!("{}: connection to {} closed by peer", conn.handle, conn.remote);
            conn.state = TcpState::Closed;
            conn.notify(EventKind::RemoteClosed, None, false);
        }
        _ => {}
    }
}

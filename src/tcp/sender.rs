//! Per-tick transmission decisions for one connection: new data, go-back-N
//! retransmission, zero-window probes and the local side of the close handshake.

use crate::config::TcpConfig;
use crate::link::Link;
use crate::tcp::conn::Connection;
use crate::tcp::event::EventKind;
use crate::tcp::options::syn_options;
use crate::tcp::rtt::TimerCheck;
use crate::tcp::state::TcpState;
use crate::tcp::tcp_flags::TcpFlags;
use crate::tcp::tcp_segment::Transmitter;
use log::{debug, info, warn};

/// Run the scheduler for one connection. Dead connections are left in `Closed` for the sweep.
pub(crate) fn poll<L: Link>(conn: &mut Connection<'_>, tx: &mut Transmitter<L>, config: &TcpConfig, now: u64) {
    if conn.abort_requested {
        abort(conn, tx);
        return;
    }

    match conn.state {
        TcpState::Init => send_syn(conn, tx, config, now),
        TcpState::SynSent | TcpState::SynRcvd => match conn.timer.check(now, conn.rtt.rto(), config) {
            TimerCheck::Exhausted => abandon(conn, tx),
            TimerCheck::Expired => {
                resend_syn(conn, tx);
                conn.timer.backoff(now);
            }
            TimerCheck::Pending => {}
        },
        TcpState::Established | TcpState::CloseWait => {
            if !transmit_data(conn, tx, config, now) {
                return;
            }

            // Passive closers answer FIN as soon as their last chunk is acknowledged
            let closing = conn.close_requested || conn.state == TcpState::CloseWait;
            if closing && conn.tx.is_none() {
                send_fin(conn, tx, now);
            }
        }
        TcpState::FinWait1 | TcpState::Closing | TcpState::LastAck => {
            match conn.timer.check(now, conn.rtt.rto(), config) {
                TimerCheck::Exhausted => return abandon(conn, tx),
                TimerCheck::Expired => {
                    let seq = conn.snd_nxt - 1;
                    tx.transmit(conn, TcpFlags::FIN | TcpFlags::ACK, seq, &[], &[]);
                    conn.ack_owed = false;
                    conn.timer.backoff(now);
                }
                TimerCheck::Pending => {}
            }
            flush_ack(conn, tx);
        }
        TcpState::FinWait2 => {
            // Only bounded by the connection budget; nothing to retransmit
            if conn.timer.check(now, conn.rtt.rto(), config) == TimerCheck::Exhausted {
                return abandon(conn, tx);
            }
            flush_ack(conn, tx);
        }
        TcpState::TimeWait => {
            let seq = conn.snd_nxt;
            tx.transmit(conn, TcpFlags::ACK, seq, &[], &[]);
            conn.ack_owed = false;
            conn.state = TcpState::Closed;

            info!("{}: connection to {} closed", conn.handle, conn.remote);
            conn.notify(EventKind::Closed, None, false);
        }
        TcpState::Closed => {}
    }
}

fn send_syn<L: Link>(conn: &mut Connection<'_>, tx: &mut Transmitter<L>, config: &TcpConfig, now: u64) {
    let options = syn_options(config.mss);
    let iss = conn.iss;
    tx.transmit(conn, TcpFlags::SYN, iss, &options, &[]);

    conn.state = TcpState::SynSent;
    conn.handshake_ts = now;
    conn.timer.restart(now);
}

fn resend_syn<L: Link>(conn: &mut Connection<'_>, tx: &mut Transmitter<L>) {
    let flags = match conn.state {
        TcpState::SynRcvd => TcpFlags::SYN | TcpFlags::ACK,
        _ => TcpFlags::SYN,
    };
    let options = syn_options(conn.mss);
    let iss = conn.iss;

    debug!("{}: retransmitting {:?} to {}", conn.handle, flags, conn.remote);
    tx.transmit(conn, flags, iss, &options, &[]);
}

/// Decide what data segment, if any, goes out this tick. At most one segment is sent.
/// Returns false when the connection was abandoned.
fn transmit_data<L: Link>(conn: &mut Connection<'_>, tx: &mut Transmitter<L>, config: &TcpConfig, now: u64) -> bool {
    let mut flags = TcpFlags::ACK;
    let mut seq = conn.snd_nxt;
    let mut payload: &[u8] = &[];

    if let Some(buf) = conn.tx {
        let sent = conn.bytes_sent();
        let acked = conn.bytes_acked();
        let mss = conn.mss as usize;

        if !conn.rexmit_mode {
            if buf.len() > sent {
                if conn.peer_wnd == 0 {
                    enter_zero_window(conn, now);
                } else {
                    let len = (buf.len() - sent).min(mss).min(conn.peer_wnd as usize);
                    payload = &buf[sent..sent + len];
                    seq = conn.snd_nxt;

                    conn.snd_nxt += len as u32;
                    conn.peer_wnd -= len as u32;
                    conn.ack_owed = true;
                    if sent + len == buf.len() {
                        flags |= TcpFlags::PSH;
                    }

                    conn.rtt.arm(conn.snd_nxt, now, config);
                    conn.timer.restart(now);
                }
            } else if buf.len() > acked {
                // Everything sent, waiting for the peer
                match conn.timer.check(now, conn.rtt.rto(), config) {
                    TimerCheck::Exhausted => {
                        abandon(conn, tx);
                        return false;
                    }
                    TimerCheck::Expired => {
                        debug!("{}: retransmission timeout at {}", conn.handle, conn.snd_una);
                        conn.rexmit_mode = true;
                        conn.rexmit_wait_ack = false;
                    }
                    TimerCheck::Pending => {}
                }
            }
        }

        if conn.rexmit_mode {
            if conn.rexmit_wait_ack {
                match conn.timer.check(now, conn.rtt.rto(), config) {
                    TimerCheck::Exhausted => {
                        abandon(conn, tx);
                        return false;
                    }
                    TimerCheck::Expired => conn.rexmit_wait_ack = false,
                    TimerCheck::Pending => {}
                }
            }

            if !conn.rexmit_wait_ack && !conn.zero_window {
                // Go back to the oldest unacknowledged byte
                let len = (buf.len() - acked).min(mss).min(conn.peer_wnd.max(1) as usize);
                payload = &buf[acked..acked + len];
                seq = conn.snd_una;

                let end = conn.snd_una + len as u32;
                if end.after(conn.snd_nxt) {
                    conn.snd_nxt = end;
                }
                conn.ack_owed = true;
                conn.rexmit_wait_ack = true;
                conn.rtt.cancel();
                conn.timer.backoff(now);
            }
        }

        if conn.peer_wnd == 0 || conn.zero_window {
            enter_zero_window(conn, now);

            if buf.len() > acked {
                match conn.timer.check(now, conn.rtt.rto(), config) {
                    TimerCheck::Exhausted => {
                        abandon(conn, tx);
                        return false;
                    }
                    TimerCheck::Expired => {
                        payload = &buf[acked..acked + 1];
                        seq = conn.snd_una;
                        flags = TcpFlags::ACK;
                        if conn.snd_nxt == conn.snd_una {
                            conn.snd_nxt += 1;
                        }

                        debug!("{}: zero-window probe at {}", conn.handle, seq);
                        conn.ack_owed = true;
                        conn.rtt.cancel();
                        conn.timer.backoff(now);
                    }
                    TimerCheck::Pending => {}
                }
            }
        }
    }

    if conn.ack_owed {
        conn.ack_owed = false;
        tx.transmit(conn, flags, seq, &[], payload);
    }
    true
}

fn enter_zero_window(conn: &mut Connection<'_>, now: u64) {
    if !conn.zero_window {
        debug!("{}: peer window closed", conn.handle);
        conn.zero_window = true;
        conn.timer.restart(now);
    }
}

fn send_fin<L: Link>(conn: &mut Connection<'_>, tx: &mut Transmitter<L>, now: u64) {
    let seq = conn.snd_nxt;
    tx.transmit(conn, TcpFlags::FIN | TcpFlags::ACK, seq, &[], &[]);

    // FIN occupies one sequence number
    conn.snd_nxt += 1;
    conn.ack_owed = false;
    conn.timer.restart(now);

    if conn.state == TcpState::CloseWait {
        conn.state = TcpState::LastAck;
    } else {
        conn.state = TcpState::FinWait1;
        info!("{}: closing connection to {}", conn.handle, conn.remote);
        raise(conn, tx, EventKind::Closing, None);
    }
}

fn flush_ack<L: Link>(conn: &mut Connection<'_>, tx: &mut Transmitter<L>) {
    if conn.ack_owed {
        conn.ack_owed = false;
        let seq = conn.snd_nxt;
        tx.transmit(conn, TcpFlags::ACK, seq, &[], &[]);
    }
}

/// Deliver an event, then honour an abort requested from inside the callback.
/// Returns false when the connection is gone.
pub(crate) fn raise<L: Link>(
    conn: &mut Connection<'_>,
    tx: &mut Transmitter<L>,
    kind: EventKind,
    payload: Option<&[u8]>,
) -> bool {
    conn.notify(kind, payload, false);
    if conn.abort_requested {
        abort(conn, tx);
        return false;
    }
    true
}

/// Reset the connection on behalf of the application. No event is raised.
pub(crate) fn abort<L: Link>(conn: &mut Connection<'_>, tx: &mut Transmitter<L>) {
    if conn.state != TcpState::Init {
        let seq = conn.snd_nxt;
        tx.transmit(conn, TcpFlags::RST | TcpFlags::ACK, seq, &[], &[]);
    }

    info!("{}: connection to {} reset", conn.handle, conn.remote);
    conn.state = TcpState::Closed;
}

/// Retransmission budget exhausted: reset the peer, notify once, and die.
fn abandon<L: Link>(conn: &mut Connection<'_>, tx: &mut Transmitter<L>) {
    warn!(
        "{}: giving up on {} in {} after {} retransmissions",
        conn.handle,
        conn.remote,
        conn.state,
        conn.timer.retries()
    );

    let seq = conn.snd_nxt;
    tx.transmit(conn, TcpFlags::RST | TcpFlags::ACK, seq, &[], &[]);

    // Only connections the application has been told about get an event
    let silent = matches!(conn.state, TcpState::Init | TcpState::SynRcvd);

    conn.state = TcpState::Closed;
    if !silent {
        conn.notify(EventKind::RemoteClosed, None, true);
    }
}

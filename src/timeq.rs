/*
Time-queue for the memory timing model.

A TimedServer enforces a service law on a shared resource: every request occupies the server
for ceil(size / bytes_per_cycle) cycles (its issue slot), then becomes ready after a further
fixed base latency.  Issue slots are serialized; latencies overlap, so a long-latency server
still sustains its configured bandwidth.

When the bounded FIFO is full the server hands the request back as Backpressure and the caller
keeps it until a later cycle.  Accepted requests yield a Ticket describing when the service will
complete.
*/

use std::collections::VecDeque;

use serde::Deserialize;

pub type Cycle = u64;

// Result of queueing a request with a timed server
#[derive(Debug, Clone, Copy)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
    size_bytes: u32,
}

impl Ticket {
    fn new(issued_at: Cycle, ready_at: Cycle, size_bytes: u32) -> Self {
        Self {
            issued_at,
            ready_at,
            size_bytes,
        }
    }

    // Cycle at which the request entered the server.
    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    // Cycle at which the server will make the payload available to downstream consumers.
    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }

    // Number of cycles until the ticket is ready.  Returns zero if already ready.
    pub fn remaining_cycles(&self, now: Cycle) -> Cycle {
        self.ready_at.saturating_sub(now)
    }
}

#[derive(Debug)]
pub struct ServiceRequest<T> {
    pub payload: T,
    pub size_bytes: u32,
}

impl<T> ServiceRequest<T> {
    pub fn new(payload: T, size_bytes: u32) -> Self {
        Self { payload, size_bytes }
    }
}

#[derive(Debug)]
pub struct ServiceResult<T> {
    pub payload: T,
    pub ticket: Ticket,
}

/// The bounded FIFO was full; the request is handed back for a later retry.
#[derive(Debug)]
pub struct Backpressure<T> {
    pub request: ServiceRequest<T>,
    pub capacity: usize,
}

impl<T> Backpressure<T> {
    pub fn into_request(self) -> ServiceRequest<T> {
        self.request
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Fixed latency added to every request
    pub base_latency: Cycle,
    // Throughput
    pub bytes_per_cycle: u32,
    // Maximum number of outstanding requests the server will accept
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_latency: 0,
            bytes_per_cycle: 1,
            queue_capacity: 1,
        }
    }
}

#[derive(Debug)]
struct Inflight<T> {
    payload: T,
    ticket: Ticket,
}

#[derive(Debug)]
pub struct TimedServer<T> {
    config: ServerConfig,
    inflight: VecDeque<Inflight<T>>,
    busy_until: Cycle,
}

impl<T> TimedServer<T> {
    pub fn new(config: ServerConfig) -> Self {
        assert!(config.bytes_per_cycle > 0, "bytes_per_cycle must be > 0");
        assert!(config.queue_capacity > 0, "queue_capacity must be > 0");
        Self {
            config,
            inflight: VecDeque::with_capacity(config.queue_capacity),
            busy_until: 0,
        }
    }

    // Attempt to enqueue a request at the provided cycle.
    pub fn try_enqueue(
        &mut self,
        now: Cycle,
        request: ServiceRequest<T>,
    ) -> Result<Ticket, Backpressure<T>> {
        if self.inflight.len() >= self.config.queue_capacity {
            return Err(Backpressure {
                request,
                capacity: self.config.queue_capacity,
            });
        }

        let start = self.busy_until.max(now);
        let slot_end = start.saturating_add(self.service_cycles(request.size_bytes));
        let ready_at = slot_end.saturating_add(self.config.base_latency);
        let ticket = Ticket::new(now, ready_at, request.size_bytes);

        self.busy_until = slot_end;
        self.inflight.push_back(Inflight {
            payload: request.payload,
            ticket,
        });

        Ok(ticket)
    }

    // Drain any requests that have completed by "now" and invoke the supplied callback with the
    // results.
    pub fn service_ready<F>(&mut self, now: Cycle, mut callback: F)
    where
        F: FnMut(ServiceResult<T>),
    {
        while let Some(front) = self.inflight.front() {
            if !front.ticket.is_ready(now) {
                break;
            }
            let inflight = self.inflight.pop_front().expect("front just checked");
            callback(ServiceResult {
                payload: inflight.payload,
                ticket: inflight.ticket,
            });
        }
    }

    pub fn is_full(&self) -> bool {
        self.inflight.len() >= self.config.queue_capacity
    }

    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }

    // Returns the earliest cycle at which a new request could begin service.
    pub fn available_at(&self) -> Cycle {
        self.busy_until
    }

    pub fn oldest_ticket(&self) -> Option<&Ticket> {
        self.inflight.front().map(|inflight| &inflight.ticket)
    }

    fn service_cycles(&self, size_bytes: u32) -> Cycle {
        ceil_div_u64(size_bytes as u64, self.config.bytes_per_cycle as u64)
    }
}

fn ceil_div_u64(nom: u64, denom: u64) -> Cycle {
    debug_assert!(denom > 0);
    (nom + denom - 1) / denom
}

//! Host-runnable rendition of the toy example every board port in the
//! source ships (`demo_stm32f0/main.c`): a tick source allocates a message
//! and pushes it to a queue; an actor subscribed to that queue toggles an
//! LED each time one arrives, frees the message, and re-subscribes.
//!
//! There is no real SysTick or GPIO here — `mg-sim`'s `HostPort` stands in
//! for the board, and this binary drives the tick source itself in a
//! loop, the way the original's `SysTick_Handler` would have been driven
//! by hardware. This is the literal "blink-by-message" scenario (spec.md
//! §8, scenario 1): a pool of one zero-payload message recycled once per
//! tick.

use mg_core::{Actor, ActorCore, ActorOutcome, Pool, Queue};
use mg_port::Vector;
use mg_sim::HostPort;

static POOL: Pool<(), 1, HostPort> = Pool::new();
static QUEUE: Queue<(), HostPort> = Queue::new();
static LED: Actor<(), HostPort> = Actor::new(on_message);

fn on_message(_core: &ActorCore, msg: Option<&mg_core::Slot<()>>) -> ActorOutcome<(), HostPort> {
    if let Some(slot) = msg {
        static STATE: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);
        let on = !STATE.fetch_xor(true, core::sync::atomic::Ordering::Relaxed);
        println!("LED {}", if on { "on" } else { "off" });
        unsafe { POOL.free(core::ptr::NonNull::from(slot)) };
    }
    ActorOutcome::Requeue(&QUEUE)
}

fn main() {
    // Vector 0: the default non-preemption vector in `mg-sim`'s `HostPort`.
    // Posting to it only sets a pending flag (the real ISR path dispatches
    // through `mg_core::context_schedule`), so this loop plays the role of
    // the board's interrupt controller, pumping pending vectors itself.
    LED.init(Vector::new(0), Some(&QUEUE));

    const TICKS: usize = 10;
    for tick in 0..TICKS {
        match POOL.alloc(()) {
            Some(msg) => unsafe { QUEUE.push(msg) },
            None => println!("tick {tick}: pool exhausted, message dropped"),
        }
        for vect in mg_sim::take_pending() {
            mg_core::context_schedule::<HostPort>(vect);
        }
    }
}

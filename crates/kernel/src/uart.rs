// low-level driver routines for the 16550a UART.

use core::ptr;
use core::sync::atomic::Ordering;

use crate::console;
use crate::memlayout::UART0;
use crate::printf::PANICKED;
use crate::proc::{self, Cpus};
use crate::spinlock::Mutex;

pub static UART: Uart = Uart::new();

// the UART control registers, mapped at UART0.
const RHR: usize = 0; // receive holding register (for input bytes)
const THR: usize = 0; // transmit holding register (for output bytes)
const IER: usize = 1; // interrupt enable register
const IER_RX_ENABLE: u8 = 1 << 0;
const IER_TX_ENABLE: u8 = 1 << 1;
const FCR: usize = 2; // FIFO control register
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1; // clear the content of the two FIFOs
const LCR: usize = 3; // line control register
const LCR_EIGHT_BITS: u8 = 3;
const LCR_BAUD_LATCH: u8 = 1 << 7; // special mode to set baud rate
const LSR: usize = 5; // line status register
const LSR_RX_READY: u8 = 1 << 0; // input is waiting to be read from RHR
const LSR_TX_IDLE: u8 = 1 << 5; // THR can accept another character to send

const TX_BUF_SIZE: usize = 32;

struct Tx {
    buf: [u8; TX_BUF_SIZE],
    w: usize, // write next to buf[w % TX_BUF_SIZE]
    r: usize, // read next from buf[r % TX_BUF_SIZE]
}

pub struct Uart {
    tx: Mutex<Tx>,
}

#[inline]
fn reg_read(reg: usize) -> u8 {
    unsafe { ptr::read_volatile((UART0 + reg) as *const u8) }
}

#[inline]
fn reg_write(reg: usize, v: u8) {
    unsafe { ptr::write_volatile((UART0 + reg) as *mut u8, v) }
}

// # Safety
// Must run once, before the UART is used.
pub unsafe fn init() {
    // disable interrupts.
    reg_write(IER, 0x00);
    // special mode to set baud rate.
    reg_write(LCR, LCR_BAUD_LATCH);
    // LSB for baud rate of 38.4K.
    reg_write(0, 0x03);
    // MSB for baud rate of 38.4K.
    reg_write(1, 0x00);
    // leave set-baud mode, and set word length to 8 bits, no parity.
    reg_write(LCR, LCR_EIGHT_BITS);
    // reset and enable FIFOs.
    reg_write(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);
    // enable transmit and receive interrupts.
    reg_write(IER, IER_TX_ENABLE | IER_RX_ENABLE);
}

impl Uart {
    const fn new() -> Self {
        Self {
            tx: Mutex::new(
                Tx {
                    buf: [0; TX_BUF_SIZE],
                    w: 0,
                    r: 0,
                },
                "uart",
            ),
        }
    }

    // add a character to the output buffer and tell the UART to
    // start sending if it isn't already. blocks if the output buffer
    // is full; because it may block, it can't be called from
    // interrupts; it's only suitable for use by write().
    pub fn putc(&self, c: u8) {
        let mut tx = self.tx.lock();

        if PANICKED.load(Ordering::Relaxed) {
            loop {
                core::hint::spin_loop()
            }
        }
        while tx.w == tx.r + TX_BUF_SIZE {
            // buffer is full; wait for start_tx() to open up space.
            tx = proc::sleep(&self.tx as *const _ as usize, tx);
        }
        let w = tx.w % TX_BUF_SIZE;
        tx.buf[w] = c;
        tx.w += 1;
        self.start_tx(&mut tx);
    }

    // if the UART is idle, and a character is waiting in the
    // transmit buffer, send it. caller must hold the tx lock.
    fn start_tx(&self, tx: &mut Tx) {
        loop {
            if tx.w == tx.r {
                // transmit buffer is empty.
                reg_read(2); // ISR, clears a pending tx interrupt
                return;
            }
            if reg_read(LSR) & LSR_TX_IDLE == 0 {
                // the UART transmit holding register is full, so we
                // cannot give it another byte. it will interrupt when
                // it's ready for a new byte.
                return;
            }
            let r = tx.r % TX_BUF_SIZE;
            let c = tx.buf[r];
            tx.r += 1;
            // maybe putc() is waiting for space in the buffer.
            proc::wakeup(&self.tx as *const _ as usize);
            reg_write(THR, c);
        }
    }

    // handle a uart interrupt, raised because input has arrived, or
    // the uart is ready for more output, or both. called from
    // devintr().
    pub fn intr(&self) {
        // read and process incoming characters.
        while reg_read(LSR) & LSR_RX_READY != 0 {
            let c = reg_read(RHR);
            console::CONS.intr(c);
        }

        // send buffered characters.
        let mut tx = self.tx.lock();
        self.start_tx(&mut tx);
    }
}

// alternate version of putc() that doesn't use interrupts, for use
// by kernel printf() and to echo characters. it spins waiting for
// the uart's output register to be empty.
pub fn putc_sync(c: u8) {
    let _intr_lock = Cpus::lock_mycpu("uart_sync");

    // wait for Transmit Holding Empty to be set in LSR.
    while reg_read(LSR) & LSR_TX_IDLE == 0 {
        core::hint::spin_loop()
    }
    reg_write(THR, c);
}

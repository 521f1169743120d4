//! Synchronous rendezvous between speakers and listeners.

use parking_lot::Mutex;

use crate::core::SchedulerError;
use crate::kernel::Kernel;
use crate::sync::{Condition, Lock};

#[derive(Debug, Default)]
struct Mailbox {
    word: Option<i32>,
    speaking: bool,
    handed_off: bool,
}

/// Pairs each [`Communicator::speak`] with exactly one
/// [`Communicator::listen`]. Neither side returns before the word has
/// changed hands.
#[derive(Debug)]
pub struct Communicator {
    lock: Lock,
    speakers: Condition,
    listeners: Condition,
    completion: Condition,
    mailbox: Mutex<Mailbox>,
}

impl Communicator {
    /// Create an idle communicator.
    #[must_use]
    pub fn new(kernel: &Kernel) -> Self {
        let lock = Lock::new(kernel);
        Self {
            speakers: Condition::new(&lock),
            listeners: Condition::new(&lock),
            completion: Condition::new(&lock),
            lock,
            mailbox: Mutex::new(Mailbox::default()),
        }
    }

    /// Deliver `word` to one listener, blocking until it has been taken.
    ///
    /// # Errors
    ///
    /// Propagates lock or kernel failures.
    pub fn speak(&self, word: i32) -> Result<(), SchedulerError> {
        self.lock.acquire()?;
        while self.mailbox.lock().speaking {
            self.speakers.sleep()?;
        }
        {
            let mut mailbox = self.mailbox.lock();
            mailbox.speaking = true;
            mailbox.word = Some(word);
        }
        self.listeners.wake()?;
        while !self.mailbox.lock().handed_off {
            self.completion.sleep()?;
        }
        {
            let mut mailbox = self.mailbox.lock();
            mailbox.speaking = false;
            mailbox.handed_off = false;
        }
        self.speakers.wake()?;
        self.lock.release()
    }

    /// Wait for a speaker and return its word.
    ///
    /// # Errors
    ///
    /// Propagates lock or kernel failures.
    pub fn listen(&self) -> Result<i32, SchedulerError> {
        self.lock.acquire()?;
        let word = loop {
            let taken = self.mailbox.lock().word.take();
            if let Some(word) = taken {
                break word;
            }
            self.listeners.sleep()?;
        };
        self.mailbox.lock().handed_off = true;
        self.completion.wake()?;
        self.lock.release()?;
        Ok(word)
    }
}

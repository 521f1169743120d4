//! River crossing: adults and children move from Oahu to Molokai in one boat
//! that carries a single adult or up to two children. Everyone coordinates
//! through kernel locks and condition variables; arrivals report how many
//! people are left on Oahu over a communicator.

use std::sync::Arc;

use parking_lot::Mutex;

use prometheus_kthreads::config::KernelConfig;
use prometheus_kthreads::core::PolicyKind;
use prometheus_kthreads::kernel::Kernel;
use prometheus_kthreads::sync::{Communicator, Condition, Lock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Island {
    Oahu,
    Molokai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trip {
    ChildRowToMolokai,
    ChildRideToMolokai,
    AdultRowToMolokai,
    ChildRowToOahu,
}

#[derive(Debug, Clone, Copy)]
enum Person {
    Adult,
    Child,
}

/// What a thread does after inspecting the shore, performed without the
/// shore guard held.
enum Action {
    Finish,
    Wait(Island),
    BoardAsPilot,
    Crossed { left_behind: i32, wake_pilot: bool },
    RowedBack,
}

#[derive(Debug, Clone)]
struct Shore {
    boat: Island,
    children_oahu: i32,
    adults_oahu: i32,
    children_molokai: i32,
    adults_molokai: i32,
    /// A child sits in the boat on Oahu waiting for a second child.
    pilot_waiting: bool,
    /// Head count on Oahu as seen by the last arrival on Molokai.
    left_behind: i32,
    done: bool,
    trips: Vec<Trip>,
}

/// Shared crossing state. `shore` is only touched while `lock` is held.
struct Crossing {
    lock: Lock,
    oahu: Condition,
    molokai: Condition,
    boat: Condition,
    reports: Communicator,
    shore: Mutex<Shore>,
}

impl Crossing {
    fn new(kernel: &Kernel, adults: i32, children: i32) -> Self {
        let lock = Lock::new(kernel);
        Self {
            oahu: Condition::new(&lock),
            molokai: Condition::new(&lock),
            boat: Condition::new(&lock),
            lock,
            reports: Communicator::new(kernel),
            shore: Mutex::new(Shore {
                boat: Island::Oahu,
                children_oahu: children,
                adults_oahu: adults,
                children_molokai: 0,
                adults_molokai: 0,
                pilot_waiting: false,
                left_behind: adults + children,
                done: false,
                trips: Vec::new(),
            }),
        }
    }

    fn waiters(&self, island: Island) -> &Condition {
        match island {
            Island::Oahu => &self.oahu,
            Island::Molokai => &self.molokai,
        }
    }

    fn child_step(&self, here: &mut Island) -> Action {
        let mut shore = self.shore.lock();
        if shore.done {
            return Action::Finish;
        }
        let at = *here;
        match at {
            Island::Oahu if shore.boat != Island::Oahu => Action::Wait(Island::Oahu),
            Island::Oahu if shore.pilot_waiting => {
                shore.pilot_waiting = false;
                shore.children_oahu -= 1;
                shore.trips.push(Trip::ChildRowToMolokai);
                shore.trips.push(Trip::ChildRideToMolokai);
                shore.children_molokai += 2;
                *here = Island::Molokai;
                let left_behind = shore.arrive();
                Action::Crossed {
                    left_behind,
                    wake_pilot: true,
                }
            }
            Island::Oahu if shore.children_oahu >= 2 => {
                shore.pilot_waiting = true;
                shore.children_oahu -= 1;
                *here = Island::Molokai;
                Action::BoardAsPilot
            }
            Island::Oahu if shore.adults_oahu == 0 => {
                shore.children_oahu -= 1;
                shore.trips.push(Trip::ChildRowToMolokai);
                shore.children_molokai += 1;
                *here = Island::Molokai;
                let left_behind = shore.arrive();
                Action::Crossed {
                    left_behind,
                    wake_pilot: false,
                }
            }
            Island::Oahu => Action::Wait(Island::Oahu),
            Island::Molokai if shore.boat != Island::Molokai || shore.left_behind == 0 => {
                Action::Wait(Island::Molokai)
            }
            Island::Molokai => {
                shore.children_molokai -= 1;
                shore.trips.push(Trip::ChildRowToOahu);
                shore.boat = Island::Oahu;
                shore.children_oahu += 1;
                *here = Island::Oahu;
                Action::RowedBack
            }
        }
    }

    fn adult_step(&self, here: &mut Island) -> Action {
        let mut shore = self.shore.lock();
        if shore.done {
            return Action::Finish;
        }
        if *here == Island::Molokai {
            return Action::Wait(Island::Molokai);
        }
        if shore.boat != Island::Oahu || shore.pilot_waiting || shore.children_oahu >= 2 {
            return Action::Wait(Island::Oahu);
        }
        shore.adults_oahu -= 1;
        shore.trips.push(Trip::AdultRowToMolokai);
        shore.adults_molokai += 1;
        *here = Island::Molokai;
        let left_behind = shore.arrive();
        Action::Crossed {
            left_behind,
            wake_pilot: false,
        }
    }

    fn perform(&self, action: Action) -> bool {
        match action {
            Action::Finish => return false,
            Action::Wait(island) => self.waiters(island).sleep().unwrap(),
            Action::BoardAsPilot => {
                self.oahu.wake_all().unwrap();
                self.boat.sleep().unwrap();
            }
            Action::Crossed {
                left_behind,
                wake_pilot,
            } => {
                if wake_pilot {
                    self.boat.wake().unwrap();
                }
                self.molokai.wake_all().unwrap();
                self.reports.speak(left_behind).unwrap();
            }
            Action::RowedBack => self.oahu.wake_all().unwrap(),
        }
        true
    }

    fn itinerary(&self, person: Person) {
        let mut here = Island::Oahu;
        self.lock.acquire().unwrap();
        loop {
            let action = match person {
                Person::Adult => self.adult_step(&mut here),
                Person::Child => self.child_step(&mut here),
            };
            if !self.perform(action) {
                break;
            }
        }
        self.lock.release().unwrap();
    }
}

impl Shore {
    /// Land the boat on Molokai and record who is still on Oahu.
    fn arrive(&mut self) -> i32 {
        self.boat = Island::Molokai;
        self.left_behind = self.children_oahu + self.adults_oahu;
        self.left_behind
    }
}

fn run_crossing(config: KernelConfig, adults: i32, children: i32) -> Shore {
    Kernel::run(config, |kernel| {
        let crossing = Arc::new(Crossing::new(kernel, adults, children));
        let mut people = Vec::new();
        for i in 0..children {
            let crossing = Arc::clone(&crossing);
            people.push(
                kernel
                    .fork(format!("child-{i}"), move |_| crossing.itinerary(Person::Child))
                    .unwrap(),
            );
        }
        for i in 0..adults {
            let crossing = Arc::clone(&crossing);
            people.push(
                kernel
                    .fork(format!("adult-{i}"), move |_| crossing.itinerary(Person::Adult))
                    .unwrap(),
            );
        }

        while crossing.reports.listen().unwrap() > 0 {}

        crossing.lock.acquire().unwrap();
        crossing.shore.lock().done = true;
        crossing.molokai.wake_all().unwrap();
        crossing.oahu.wake_all().unwrap();
        crossing.lock.release().unwrap();

        for person in &people {
            kernel.join(person).unwrap();
        }
        let shore = crossing.shore.lock().clone();
        shore
    })
    .unwrap()
}

/// Replay the trip log: every departure leaves from the island the boat is
/// on, a rider only ever joins a rowing child, and the boat ends on Molokai.
fn assert_valid_trips(trips: &[Trip]) {
    let mut boat = Island::Oahu;
    let mut previous = None;
    for &trip in trips {
        match trip {
            Trip::ChildRowToMolokai | Trip::AdultRowToMolokai => {
                assert_eq!(boat, Island::Oahu, "{trips:?}");
                boat = Island::Molokai;
            }
            Trip::ChildRideToMolokai => {
                assert_eq!(previous, Some(Trip::ChildRowToMolokai), "{trips:?}");
            }
            Trip::ChildRowToOahu => {
                assert_eq!(boat, Island::Molokai, "{trips:?}");
                boat = Island::Oahu;
            }
        }
        previous = Some(trip);
    }
    assert_eq!(boat, Island::Molokai, "{trips:?}");
}

fn assert_everyone_crossed(shore: &Shore, adults: i32, children: i32) {
    assert_eq!((shore.adults_oahu, shore.children_oahu), (0, 0));
    assert_eq!(
        (shore.adults_molokai, shore.children_molokai),
        (adults, children)
    );
    let adult_trips = shore
        .trips
        .iter()
        .filter(|t| **t == Trip::AdultRowToMolokai)
        .count();
    assert_eq!(adult_trips, usize::try_from(adults).unwrap());
    assert_valid_trips(&shore.trips);
}

#[test]
fn test_two_children_cross_together() {
    let shore = run_crossing(KernelConfig::new(), 0, 2);
    assert_everyone_crossed(&shore, 0, 2);
    assert_eq!(
        shore.trips,
        vec![Trip::ChildRowToMolokai, Trip::ChildRideToMolokai]
    );
}

#[test]
fn test_lone_child_rows_alone() {
    let shore = run_crossing(KernelConfig::new(), 0, 1);
    assert_everyone_crossed(&shore, 0, 1);
    assert_eq!(shore.trips, vec![Trip::ChildRowToMolokai]);
}

#[test]
fn test_one_adult_two_children() {
    let shore = run_crossing(KernelConfig::new(), 1, 2);
    assert_everyone_crossed(&shore, 1, 2);
}

#[test]
fn test_three_adults_three_children() {
    let shore = run_crossing(KernelConfig::new(), 3, 3);
    assert_everyone_crossed(&shore, 3, 3);
}

#[test]
fn test_many_children_few_adults() {
    let shore = run_crossing(KernelConfig::new(), 2, 5);
    assert_everyone_crossed(&shore, 2, 5);
}

#[test]
fn test_crossing_under_lottery_scheduling() {
    let config = KernelConfig::new()
        .with_policy(PolicyKind::Lottery)
        .with_seed(0xb0a7);
    let shore = run_crossing(config, 3, 4);
    assert_everyone_crossed(&shore, 3, 4);
}

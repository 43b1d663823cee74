/// Cyclic duty timetable of a node.
///
/// A schedule is a sequence of shifts `(servers, end)`: during the `i`-th shift, which lasts
/// until `end`, exactly `servers` servers are on duty. Once the last shift ends, the timetable
/// starts over, so the schedule repeats with a period equal to the end of the last shift.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    shifts: Vec<(usize, f64)>,
}

impl Schedule {
    /// Constructs a schedule from `(servers, end)` pairs.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if there are no shifts, if shift ends are not strictly
    /// increasing positive numbers, or if no shift has any server on duty.
    pub fn new(shifts: Vec<(usize, f64)>) -> Result<Self, String> {
        if shifts.is_empty() {
            return Err(String::from("schedule must contain at least one shift"));
        }
        let mut previous = 0.0;
        for &(_, end) in &shifts {
            if !end.is_finite() || end <= previous {
                return Err(format!(
                    "shift ends must be strictly increasing and positive, found {} after {}",
                    end, previous
                ));
            }
            previous = end;
        }
        if shifts.iter().all(|&(servers, _)| servers == 0) {
            return Err(String::from("at least one shift must have servers on duty"));
        }
        Ok(Self { shifts })
    }

    /// The largest number of servers on duty at any time.
    #[must_use]
    pub fn max_servers(&self) -> usize {
        self.shifts
            .iter()
            .map(|&(servers, _)| servers)
            .max()
            .unwrap_or_default()
    }

    /// Length of a single cycle of the timetable.
    #[must_use]
    pub fn period(&self) -> f64 {
        self.shifts.last().map_or(0.0, |&(_, end)| end)
    }

    /// Returns the number of servers on duty during the shift at `cursor`, and the time at which
    /// that shift ends.
    #[must_use]
    pub fn shift(&self, cursor: ShiftCursor) -> (usize, f64) {
        let (servers, end) = self.shifts[cursor.shift];
        (servers, f64::from(cursor.cycle) * self.period() + end)
    }

    /// The shift following the one at `cursor`, wrapping around to the next cycle.
    #[must_use]
    pub fn advance(&self, cursor: ShiftCursor) -> ShiftCursor {
        if cursor.shift + 1 < self.shifts.len() {
            ShiftCursor {
                cycle: cursor.cycle,
                shift: cursor.shift + 1,
            }
        } else {
            ShiftCursor {
                cycle: cursor.cycle + 1,
                shift: 0,
            }
        }
    }
}

/// Position in a [`Schedule`]: a shift within a cycle. The default is the first shift.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShiftCursor {
    cycle: u32,
    shift: usize,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_invalid_schedules() {
        assert!(Schedule::new(vec![]).is_err());
        assert!(Schedule::new(vec![(1, 0.0)]).is_err());
        assert!(Schedule::new(vec![(1, 2.0), (2, 1.0)]).is_err());
        assert!(Schedule::new(vec![(0, 2.0), (0, 3.0)]).is_err());
    }

    #[test]
    fn test_shift_cursor() {
        let schedule = Schedule::new(vec![(2, 10.0), (0, 15.0), (3, 20.0)]).unwrap();
        assert_eq!(schedule.max_servers(), 3);
        assert_eq!(schedule.period(), 20.0);
        let mut cursor = ShiftCursor::default();
        let mut shifts = Vec::new();
        for _ in 0..7 {
            shifts.push(schedule.shift(cursor));
            cursor = schedule.advance(cursor);
        }
        assert_eq!(
            shifts,
            vec![
                (2, 10.0),
                (0, 15.0),
                (3, 20.0),
                (2, 30.0),
                (0, 35.0),
                (3, 40.0),
                (2, 50.0)
            ]
        );
    }

    #[test]
    fn test_fractional_period_ends_increase() {
        let schedule = Schedule::new(vec![(1, 0.1), (2, 0.3)]).unwrap();
        let mut cursor = ShiftCursor::default();
        let mut previous = 0.0;
        for _ in 0..10_000 {
            let (_, end) = schedule.shift(cursor);
            assert!(end > previous);
            previous = end;
            cursor = schedule.advance(cursor);
        }
    }
}

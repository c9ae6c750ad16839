//! Sensor sample sources
//!
//! Real sensors push into an `mpsc` channel of [`SensorEvent`]s; a single ingest
//! task drains it into the estimator. [`SimulatedDrive`] produces the same
//! events from a scripted speed profile.

use super::fusion::FusionHandle;
use super::geo::{bearing_deg, haversine_distance, offset_latlon};
use super::types::{AccelerationSample, LocationFix, MS_TO_KMH};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// One item on the sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SensorEvent {
    Acceleration(AccelerationSample),
    Location(LocationFix),
    /// The inertial sensor went away or came back
    InertialAvailability { available: bool },
}

impl SensorEvent {
    /// Shift the event's timestamp by `offset` seconds
    pub fn offset(self, offset: f64) -> Self {
        match self {
            SensorEvent::Acceleration(mut sample) => {
                sample.timestamp += offset;
                SensorEvent::Acceleration(sample)
            }
            SensorEvent::Location(mut fix) => {
                fix.timestamp += offset;
                SensorEvent::Location(fix)
            }
            other => other,
        }
    }
}

/// Counts of events applied by an ingest task
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub samples: u64,
    pub fixes: u64,
    pub availability_changes: u64,
}

/// Apply one event to the estimator
pub fn apply_event(fusion: &FusionHandle, event: SensorEvent, stats: &mut IngestStats) {
    match event {
        SensorEvent::Acceleration(sample) => {
            fusion.on_acceleration(sample);
            stats.samples += 1;
        }
        SensorEvent::Location(fix) => {
            fusion.on_location(fix);
            stats.fixes += 1;
        }
        SensorEvent::InertialAvailability { available } => {
            fusion.set_inertial_available(available);
            stats.availability_changes += 1;
        }
    }
}

/// Drain a sensor channel into the estimator until every sender is dropped
pub fn spawn_ingest(fusion: FusionHandle, mut rx: mpsc::Receiver<SensorEvent>) -> JoinHandle<IngestStats> {
    tokio::spawn(async move {
        let mut stats = IngestStats::default();
        while let Some(event) = rx.recv().await {
            apply_event(&fusion, event, &mut stats);
            if stats.samples > 0 && stats.samples % 300 == 0 {
                tracing::debug!(
                    "[sensors] {} samples, {} fixes, speed {:.1} km/h",
                    stats.samples,
                    stats.fixes,
                    fusion.current().value
                );
            }
        }
        tracing::info!(
            "Sensor channel closed after {} samples and {} fixes",
            stats.samples,
            stats.fixes
        );
        stats
    })
}

/// Event with the time it reaches the estimator (relative seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    pub arrival: f64,
    pub event: SensorEvent,
}

/// Scripted drive producing acceleration samples and GPS fixes
#[derive(Debug, Clone)]
pub struct SimulatedDrive {
    /// (seconds, km/h) keyframes, linearly interpolated
    keyframes: Vec<(f64, f64)>,
    /// Closed route the car follows, (lat, lon)
    route: Vec<(f64, f64)>,
    start: (f64, f64),
    sample_interval: f64,
    fix_interval: f64,
    fix_latency: f64,
    /// Amplitude of the engine vibration added to acceleration (m/s²)
    vibration: f64,
}

impl SimulatedDrive {
    pub fn new(mut keyframes: Vec<(f64, f64)>) -> Self {
        keyframes.sort_by(|a, b| a.0.total_cmp(&b.0));
        if keyframes.is_empty() {
            keyframes.push((0.0, 0.0));
        }
        Self {
            keyframes,
            route: Vec::new(),
            start: (31.3401, 121.2219),
            sample_interval: 1.0 / 30.0,
            fix_interval: 1.0,
            fix_latency: 0.15,
            vibration: 0.0,
        }
    }

    /// Launch, cruise, brake into a corner, accelerate out, stop
    pub fn demo() -> Self {
        Self::new(vec![
            (0.0, 0.0),
            (8.0, 80.0),
            (15.0, 80.0),
            (19.0, 35.0),
            (24.0, 35.0),
            (30.0, 90.0),
            (38.0, 0.0),
        ])
        .with_vibration(0.08)
    }

    pub fn with_route(mut self, route: Vec<(f64, f64)>) -> Self {
        if let Some(first) = route.first() {
            self.start = *first;
        }
        self.route = route;
        self
    }

    pub fn with_sample_interval(mut self, seconds: f64) -> Self {
        self.sample_interval = seconds;
        self
    }

    pub fn with_fix_interval(mut self, seconds: f64) -> Self {
        self.fix_interval = seconds;
        self
    }

    pub fn with_fix_latency(mut self, seconds: f64) -> Self {
        self.fix_latency = seconds;
        self
    }

    pub fn with_vibration(mut self, amplitude: f64) -> Self {
        self.vibration = amplitude;
        self
    }

    fn segment_at(&self, t: f64) -> Option<((f64, f64), (f64, f64))> {
        self.keyframes
            .windows(2)
            .find(|w| t >= w[0].0 && t <= w[1].0)
            .map(|w| (w[0], w[1]))
    }

    /// Scripted speed in km/h
    pub fn speed_kmh_at(&self, t: f64) -> f64 {
        let first = self.keyframes[0];
        let last = self.keyframes[self.keyframes.len() - 1];
        if t <= first.0 {
            return first.1;
        }
        if t >= last.0 {
            return last.1;
        }
        match self.segment_at(t) {
            Some(((t0, v0), (t1, v1))) if t1 > t0 => v0 + (v1 - v0) * (t - t0) / (t1 - t0),
            Some(((_, v0), _)) => v0,
            None => last.1,
        }
    }

    /// Longitudinal acceleration in m/s², positive when slowing down
    pub fn longitudinal_at(&self, t: f64) -> f64 {
        let slope_kmh_per_s = match self.segment_at(t) {
            Some(((t0, v0), (t1, v1))) if t1 > t0 => (v1 - v0) / (t1 - t0),
            _ => 0.0,
        };
        let vibration = self.vibration * (2.0 * std::f64::consts::PI * 12.0 * t).sin();
        -slope_kmh_per_s / MS_TO_KMH + vibration
    }

    /// Distance covered since t = 0, metres
    pub fn distance_at(&self, t: f64) -> f64 {
        let mut distance_kmh_s = 0.0;
        for w in self.keyframes.windows(2) {
            let (t0, v0) = w[0];
            let (t1, _) = w[1];
            if t <= t0 {
                break;
            }
            let end = t.min(t1);
            let v_end = self.speed_kmh_at(end);
            distance_kmh_s += (v0 + v_end) / 2.0 * (end - t0);
        }
        let (t_last, v_last) = self.keyframes[self.keyframes.len() - 1];
        if t > t_last {
            distance_kmh_s += v_last * (t - t_last);
        }
        let (t_first, v_first) = self.keyframes[0];
        if t_first > 0.0 && t > 0.0 {
            distance_kmh_s += v_first * t_first.min(t);
        }
        distance_kmh_s / MS_TO_KMH
    }

    /// (lat, lon, heading) after covering `distance` metres
    pub fn position_along(&self, distance: f64) -> (f64, f64, f64) {
        if self.route.len() < 2 {
            let heading: f64 = 45.0;
            let east = distance * heading.to_radians().sin();
            let north = distance * heading.to_radians().cos();
            let (lat, lon) = offset_latlon(self.start.0, self.start.1, east, north);
            return (lat, lon, heading);
        }

        let n = self.route.len();
        let legs: Vec<f64> = (0..n)
            .map(|i| {
                let a = self.route[i];
                let b = self.route[(i + 1) % n];
                haversine_distance(a.0, a.1, b.0, b.1)
            })
            .collect();
        let lap: f64 = legs.iter().sum();
        if lap <= 0.0 {
            return (self.route[0].0, self.route[0].1, 0.0);
        }

        let mut remaining = distance.rem_euclid(lap);
        for (i, leg) in legs.iter().enumerate() {
            let a = self.route[i];
            let b = self.route[(i + 1) % n];
            if remaining <= *leg || i == n - 1 {
                let f = if *leg > 0.0 { (remaining / leg).min(1.0) } else { 0.0 };
                let lat = a.0 + (b.0 - a.0) * f;
                let lon = a.1 + (b.1 - a.1) * f;
                return (lat, lon, bearing_deg(a.0, a.1, b.0, b.1));
            }
            remaining -= leg;
        }
        (self.route[0].0, self.route[0].1, 0.0)
    }

    /// Every event of a drive lasting `duration` seconds, in arrival order
    pub fn schedule(&self, duration: f64) -> Vec<ScheduledEvent> {
        let mut events = Vec::new();

        let samples = (duration / self.sample_interval).floor() as u64;
        for i in 0..samples {
            let t = i as f64 * self.sample_interval;
            events.push(ScheduledEvent {
                arrival: t,
                event: SensorEvent::Acceleration(AccelerationSample::new(t, self.longitudinal_at(t))),
            });
        }

        let fixes = (duration / self.fix_interval).floor() as u64;
        for k in 1..=fixes {
            let t = k as f64 * self.fix_interval;
            let (lat, lon, heading) = self.position_along(self.distance_at(t));
            let speed = self.speed_kmh_at(t) / MS_TO_KMH;
            events.push(ScheduledEvent {
                arrival: t + self.fix_latency,
                event: SensorEvent::Location(LocationFix::new(t, lat, lon, speed, heading)),
            });
        }

        events.sort_by(|a, b| a.arrival.total_cmp(&b.arrival));
        events
    }

    /// Play the drive in real time into `tx`, timestamped on `clock`
    ///
    /// Returns the number of events delivered. Events are dropped, not
    /// awaited, when the channel is full.
    pub async fn run(
        self,
        tx: mpsc::Sender<SensorEvent>,
        duration: Duration,
        clock: crate::clock::MediaClock,
    ) -> u64 {
        let schedule = self.schedule(duration.as_secs_f64());
        let start = clock.now_secs();
        let mut ticker = interval(Duration::from_secs_f64(self.sample_interval));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut next = 0;
        let mut sent = 0u64;
        let mut dropped = 0u64;
        while next < schedule.len() {
            ticker.tick().await;
            let elapsed = clock.now_secs() - start;
            while next < schedule.len() && schedule[next].arrival <= elapsed {
                match tx.try_send(schedule[next].event.offset(start)) {
                    Ok(()) => sent += 1,
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::info!("[drive] Sensor channel closed after {} events", sent);
                        return sent;
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
                }
                next += 1;
            }
        }
        if dropped > 0 {
            tracing::warn!("[drive] Dropped {} events on a full channel", dropped);
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FusionConfig;

    #[test]
    fn test_speed_profile_interpolates() {
        let drive = SimulatedDrive::new(vec![(0.0, 0.0), (10.0, 100.0)]);
        assert_eq!(drive.speed_kmh_at(-1.0), 0.0);
        assert!((drive.speed_kmh_at(5.0) - 50.0).abs() < 1e-9);
        assert_eq!(drive.speed_kmh_at(20.0), 100.0);
        // 10 km/h per second of acceleration is -(10/3.6) m/s² under the braking convention
        assert!((drive.longitudinal_at(5.0) + 10.0 / 3.6).abs() < 1e-9);
    }

    #[test]
    fn test_distance_integrates_profile() {
        let drive = SimulatedDrive::new(vec![(0.0, 36.0), (10.0, 36.0)]);
        // 36 km/h = 10 m/s
        assert!((drive.distance_at(10.0) - 100.0).abs() < 1e-6);
        assert!((drive.distance_at(12.0) - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_route_is_followed_and_looped() {
        let route = vec![(0.0, 0.0), (0.0, 0.001), (0.001, 0.001), (0.001, 0.0)];
        let drive = SimulatedDrive::new(vec![(0.0, 0.0)]).with_route(route);
        let (lat, lon, heading) = drive.position_along(10.0);
        assert_eq!(lat, 0.0);
        assert!(lon > 0.0);
        assert!((heading - 90.0).abs() < 0.01);

        let lap = 4.0 * haversine_distance(0.0, 0.0, 0.0, 0.001);
        let (lat2, lon2, _) = drive.position_along(lap + 10.0);
        assert!((lat2 - lat).abs() < 1e-6);
        assert!((lon2 - lon).abs() < 1e-6);
    }

    #[test]
    fn test_schedule_orders_by_arrival() {
        let drive = SimulatedDrive::demo();
        let schedule = drive.schedule(5.0);
        assert!(schedule.windows(2).all(|w| w[0].arrival <= w[1].arrival));

        let fixes: Vec<_> = schedule
            .iter()
            .filter_map(|e| match e.event {
                SensorEvent::Location(fix) => Some((e.arrival, fix)),
                _ => None,
            })
            .collect();
        assert_eq!(fixes.len(), 5);
        for (arrival, fix) in fixes {
            assert!(arrival > fix.timestamp);
        }
    }

    #[test]
    fn test_fused_speed_tracks_profile() {
        let drive = SimulatedDrive::new(vec![(0.0, 0.0), (6.0, 60.0), (12.0, 60.0)]);
        let fusion = FusionHandle::new(FusionConfig::default());
        let mut stats = IngestStats::default();
        for scheduled in drive.schedule(10.0) {
            apply_event(&fusion, scheduled.event, &mut stats);
        }
        assert_eq!(stats.fixes, 10);
        assert!((fusion.current().value - 60.0).abs() < 3.0);
    }

    #[tokio::test]
    async fn test_ingest_drains_channel() {
        let fusion = FusionHandle::new(FusionConfig::default());
        let (tx, rx) = mpsc::channel(16);
        let ingest = spawn_ingest(fusion.clone(), rx);

        tx.send(SensorEvent::Location(LocationFix::new(1.0, 0.0, 0.0, 10.0, 0.0)))
            .await
            .unwrap();
        tx.send(SensorEvent::InertialAvailability { available: false })
            .await
            .unwrap();
        tx.send(SensorEvent::Acceleration(AccelerationSample::new(1.1, -3.0)))
            .await
            .unwrap();
        drop(tx);

        let stats = ingest.await.unwrap();
        assert_eq!(stats.fixes, 1);
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.availability_changes, 1);
        assert!((fusion.current().value - 36.0).abs() < 1e-9);
    }
}

// Route session: the one place that owns the live map state
//
// A session holds the selected operator/route/direction, the ordered stops of
// that route, the polling timer and the displayed vehicle set. Each poll
// fetches in a spawned task and sends its result back tagged with the
// context it was started for; `apply_tick` drops anything whose context is no
// longer current.
use crate::nvt_config::CountEstimation;
use crate::nvt_eta::{aggregate, arrival_board};
use crate::nvt_models::{Direction, EtaRecord, NVTError, RawVehicleReport, Result, RouteSelection, StopRecord};
use crate::nvt_polling::{ContextId, PollingScheduler};
use crate::nvt_positions::{
    CountEstimator, EtaSpacingCount, PositionStrategy, RandomCount, RouteSignal, direct_entities, estimated_entities,
};
use crate::nvt_reconciler::{EntityReconciler, ReconcileReport};
use crate::nvt_sources::{OperatorProfile, TransitSource};
use crate::nvt_views::{MapSurface, NVTViews};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const NO_STOPS_MESSAGE: &str = "failed to load stops";

/// Builds the vehicle count estimator for an operator.
pub type EstimatorFactory = Box<dyn Fn(&OperatorProfile) -> Box<dyn CountEstimator> + Send>;

pub fn default_estimators(seed: Option<u64>) -> EstimatorFactory {
    Box::new(move |profile: &OperatorProfile| -> Box<dyn CountEstimator> {
        match profile.count_estimation {
            CountEstimation::Random => Box::new(RandomCount::new(seed)),
            CountEstimation::EtaSpacing => Box::new(EtaSpacingCount::new(Box::new(RandomCount::new(seed)))),
        }
    })
}

/// Raw data gathered by one poll.
#[derive(Debug)]
pub struct TickFetch {
    pub context: ContextId,
    /// Tick number within `context`, starting at 1.
    pub seq: u64,
    pub etas: Vec<EtaRecord>,
    pub vehicles: Vec<RawVehicleReport>,
}

#[derive(Debug, PartialEq)]
pub enum TickOutcome {
    Applied(ReconcileReport),
    /// The context is no longer current.
    Stale,
    /// A later tick of the same context has already been applied.
    Overtaken,
}

/// Fetch everything one tick needs. Failed fetches count as empty.
pub async fn fetch_tick<S: TransitSource>(
    source: &S,
    context: ContextId,
    seq: u64,
    selection: &RouteSelection,
    strategy: PositionStrategy,
) -> TickFetch {
    let etas = async {
        source.fetch_etas(selection).await.unwrap_or_else(|e| {
            warn!("Arrivals for {} unavailable: {}", selection, e);
            Vec::new()
        })
    };
    let vehicles = async {
        match strategy {
            PositionStrategy::Direct => source
                .fetch_vehicles(&selection.operator, &selection.route)
                .await
                .unwrap_or_else(|e| {
                    warn!("Vehicle feed for {} unavailable: {}", selection, e);
                    Vec::new()
                }),
            PositionStrategy::Estimated => Vec::new(),
        }
    };

    let (etas, vehicles) = futures::join!(etas, vehicles);
    TickFetch { context, seq, etas, vehicles }
}

pub struct SessionState<S: TransitSource, M: MapSurface> {
    source: Arc<S>,
    map: M,
    reconciler: EntityReconciler<M::Handle>,
    scheduler: PollingScheduler,
    ticks: UnboundedSender<TickFetch>,
    estimators: EstimatorFactory,
    estimator: Option<Box<dyn CountEstimator>>,
    operator: Option<OperatorProfile>,
    route: Option<String>,
    direction: Direction,
    stops: Vec<StopRecord>,
    last_applied: u64,
}

impl<S: TransitSource, M: MapSurface> SessionState<S, M> {
    /// Tick results arrive on the returned receiver and go back in through `apply_tick`.
    pub fn new(
        source: Arc<S>,
        map: M,
        poll_interval: Duration,
        estimators: EstimatorFactory,
    ) -> (Self, UnboundedReceiver<TickFetch>) {
        let (ticks, receiver) = mpsc::unbounded_channel();
        let session = SessionState {
            source,
            map,
            reconciler: EntityReconciler::new(),
            scheduler: PollingScheduler::new(poll_interval),
            ticks,
            estimators,
            estimator: None,
            operator: None,
            route: None,
            direction: Direction::default(),
            stops: Vec::new(),
            last_applied: 0,
        };
        (session, receiver)
    }

    // ------------------------------------------------------------------------
    // UI entry points
    // ------------------------------------------------------------------------

    pub async fn on_operator_change(&mut self, operator: &str) -> Result<()> {
        let profile = self
            .source
            .profile(operator)
            .ok_or_else(|| NVTError::ConfigError(format!("Unknown operator '{}'", operator)))?;

        match self.route.clone() {
            Some(route) => self.set_route(&profile.code, &route, Direction::Outbound).await,
            None => {
                self.reset();
                self.direction = Direction::Outbound;
                self.operator = Some(profile);
                Ok(())
            }
        }
    }

    pub async fn on_route_change(&mut self, route: &str) -> Result<()> {
        let route = route.trim().to_uppercase();
        match self.operator.as_ref().map(|p| p.code.clone()) {
            Some(code) => self.set_route(&code, &route, Direction::Outbound).await,
            None => {
                self.route = Some(route);
                self.map.show_status("select an operator to start tracking");
                Ok(())
            }
        }
    }

    /// Apply a selection given up front, loading the route at most once.
    pub async fn open(&mut self, operator: Option<&str>, route: Option<&str>, direction: Direction) -> Result<()> {
        match (operator, route) {
            (Some(operator), Some(route)) => self.set_route(operator, &route.trim().to_uppercase(), direction).await,
            (operator, route) => {
                if let Some(operator) = operator {
                    self.on_operator_change(operator).await?;
                }
                if let Some(route) = route {
                    self.on_route_change(route).await?;
                }
                self.direction = direction;
                Ok(())
            }
        }
    }

    pub async fn on_direction_toggle(&mut self) -> Result<()> {
        let direction = self.direction.toggled();
        match (self.operator.as_ref().map(|p| p.code.clone()), self.route.clone()) {
            (Some(code), Some(route)) => self.set_route(&code, &route, direction).await,
            _ => {
                self.direction = direction;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Switch to a new route context and start polling it.
    ///
    /// The previous timer is cancelled and the map cleared before anything is
    /// fetched. A stop fetch failure leaves the route without stops but still
    /// polling.
    pub async fn set_route(&mut self, operator: &str, route: &str, direction: Direction) -> Result<()> {
        let profile = self
            .source
            .profile(operator)
            .ok_or_else(|| NVTError::ConfigError(format!("Unknown operator '{}'", operator)))?;

        self.reset();

        let selection = RouteSelection {
            operator: profile.code.clone(),
            route: route.to_string(),
            direction,
        };
        self.operator = Some(profile.clone());
        self.route = Some(selection.route.clone());
        self.direction = direction;

        info!("Switching to {}", selection);

        let stops = self.source.fetch_stops(&selection).await.unwrap_or_else(|e| {
            warn!("Stops for {} unavailable: {}", selection, e);
            Vec::new()
        });
        self.draw_stops(&selection, &stops);
        self.stops = stops;

        self.estimator = Some((self.estimators)(&profile));
        self.start_polling(selection, profile.strategy);
        Ok(())
    }

    /// Stop polling and clear the map. Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.scheduler.stop();
        if !self.reconciler.is_empty() {
            debug!("Releasing {} vehicle markers", self.reconciler.len());
        }
        self.reconciler.clear_reset(&mut self.map);
        self.map.clear_all_decorations();
        self.stops.clear();
        self.estimator = None;
        self.last_applied = 0;
    }

    pub fn shutdown(&mut self) {
        self.reset();
        debug!("Session shut down");
    }

    fn draw_stops(&mut self, selection: &RouteSelection, stops: &[StopRecord]) {
        if stops.is_empty() {
            self.map.show_status(NO_STOPS_MESSAGE);
            return;
        }

        NVTViews::show_route_header(selection, stops.len());
        for (i, stop) in stops.iter().enumerate() {
            self.map.draw_stop_marker(stop.coordinate, &format!("{}. {}", i + 1, stop.name));
        }
        let coordinates: Vec<_> = stops.iter().map(|s| s.coordinate).collect();
        self.map.draw_polyline(&coordinates);
        self.map.fit_bounds(&coordinates);
    }

    fn start_polling(&mut self, selection: RouteSelection, strategy: PositionStrategy) {
        let source = Arc::clone(&self.source);
        let ticks = self.ticks.clone();
        let tick_selection = selection.clone();
        let mut seq = 0;

        self.scheduler.start(selection, move |context| {
            seq += 1;
            let source = Arc::clone(&source);
            let ticks = ticks.clone();
            let selection = tick_selection.clone();
            tokio::spawn(async move {
                let fetch = fetch_tick(source.as_ref(), context, seq, &selection, strategy).await;
                if ticks.send(fetch).is_err() {
                    debug!("Session closed, dropping tick for {}", context);
                }
            });
        });
    }

    // ------------------------------------------------------------------------
    // Tick application
    // ------------------------------------------------------------------------

    /// Turn one poll result into map updates, unless it belongs to an old
    /// context or a newer tick already landed.
    pub fn apply_tick(&mut self, fetch: TickFetch, now: DateTime<Utc>) -> TickOutcome {
        if !self.scheduler.is_current(fetch.context) {
            debug!("Discarding result of superseded {}", fetch.context);
            return TickOutcome::Stale;
        }
        if fetch.seq <= self.last_applied {
            debug!(
                "Discarding tick {} of {}, tick {} already applied",
                fetch.seq, fetch.context, self.last_applied
            );
            return TickOutcome::Overtaken;
        }
        let (Some(profile), Some(route)) = (&self.operator, &self.route) else {
            return TickOutcome::Stale;
        };

        let stop_ids: Vec<&str> = self.stops.iter().map(|s| s.stop_id.as_str()).collect();
        let arrivals = aggregate(&fetch.etas, &stop_ids, now);
        if !self.stops.is_empty() {
            self.map.show_arrivals(&arrival_board(&self.stops, &arrivals));
        }

        let entities = match profile.strategy {
            PositionStrategy::Direct => direct_entities(&fetch.vehicles, route),
            PositionStrategy::Estimated => {
                let signal = RouteSignal { stops: &self.stops, arrivals: &arrivals };
                let count = self.estimator.as_mut().map(|e| e.estimate(&signal)).unwrap_or(0);
                estimated_entities(&profile.code, route, &self.stops, count)
            }
        };

        self.last_applied = fetch.seq;
        let report = self.reconciler.reconcile(&mut self.map, &entities);
        if !report.is_noop() {
            debug!("{} on {}: {:?}", fetch.context, route, report);
        }
        self.map.present();
        TickOutcome::Applied(report)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn selection(&self) -> Option<RouteSelection> {
        Some(RouteSelection {
            operator: self.operator.as_ref()?.code.clone(),
            route: self.route.clone()?,
            direction: self.direction,
        })
    }

    pub fn operator(&self) -> Option<&OperatorProfile> {
        self.operator.as_ref()
    }

    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn stops(&self) -> &[StopRecord] {
        &self.stops
    }

    pub fn displayed_keys(&self) -> HashSet<&str> {
        self.reconciler.keys()
    }

    pub fn vehicle_count(&self) -> usize {
        self.reconciler.len()
    }

    pub fn active_context(&self) -> Option<ContextId> {
        self.scheduler.current().map(|c| c.id)
    }

    #[cfg(test)]
    pub fn map(&self) -> &M {
        &self.map
    }
}

//! Interface to the game simulation that runs on the master.

use shared::{Direction, GameState};

/// A steering request for one player's snake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlEvent {
    pub player_id: u32,
    pub direction: Direction,
}

/// Computes the next world snapshot on the master.
///
/// `previous` already carries the registry's current roster; the returned
/// snapshot's roster is absorbed back into the registry.
pub trait Simulation: Send + 'static {
    fn next_state(&mut self, previous: GameState, controls: Vec<ControlEvent>) -> GameState;
}

/// Stand-in engine that keeps the world still: it advances the state order
/// and turns existing snakes towards their latest requested direction.
#[derive(Debug, Default)]
pub struct PassiveSimulation;

impl Simulation for PassiveSimulation {
    fn next_state(&mut self, mut previous: GameState, controls: Vec<ControlEvent>) -> GameState {
        for control in controls {
            if let Some(snake) = previous
                .snakes
                .iter_mut()
                .find(|snake| snake.player_id == control.player_id)
            {
                snake.head_direction = control.direction;
            }
        }
        previous.state_order = previous.state_order.wrapping_add(1);
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Coord, Snake, SnakeState};

    #[test]
    fn test_passive_simulation_advances_order() {
        let mut simulation = PassiveSimulation;
        let state = simulation.next_state(GameState::default(), Vec::new());
        assert_eq!(state.state_order, 1);
        let state = simulation.next_state(state, Vec::new());
        assert_eq!(state.state_order, 2);
    }

    #[test]
    fn test_passive_simulation_applies_latest_direction() {
        let mut state = GameState::default();
        state.snakes.push(Snake {
            player_id: 4,
            points: vec![Coord { x: 1, y: 1 }],
            state: SnakeState::Alive,
            head_direction: Direction::Up,
        });

        let controls = vec![
            ControlEvent {
                player_id: 4,
                direction: Direction::Left,
            },
            ControlEvent {
                player_id: 9,
                direction: Direction::Right,
            },
            ControlEvent {
                player_id: 4,
                direction: Direction::Down,
            },
        ];

        let next = PassiveSimulation.next_state(state, controls);
        assert_eq!(next.snakes.len(), 1);
        assert_eq!(next.snakes[0].head_direction, Direction::Down);
    }
}

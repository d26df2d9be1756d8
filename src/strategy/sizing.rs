//! Position Sizing & Risk-Reward
//!
//! Fixed-fractional sizing: risk a set share of the balance over the stop
//! distance, with the stop never tighter than two ATRs.

use crate::domain::{Direction, PositionSizing, StopLoss, TakeProfit, TakeProfitTarget, TradingSignal, TAKE_PROFIT_LADDER};
use crate::strategy::params::SizingConfig;

/// Margin rate assumed when deriving leverage from notional
const BASE_MARGIN_RATE: f64 = 0.01;
/// Stop distance floor in ATR multiples
const ATR_STOP_MULTIPLE: f64 = 2.0;

/// Stop distance in price units
pub fn stop_loss_distance(current_price: f64, atr: f64, risk: &SizingConfig) -> f64 {
    (ATR_STOP_MULTIPLE * atr).max(current_price * risk.stop_loss_percent / 100.0)
}

pub fn calculate_position_size(
    _signal: &TradingSignal,
    account_balance: f64,
    risk: &SizingConfig,
    current_price: f64,
    atr: f64,
) -> PositionSizing {
    let risk_amount = account_balance * risk.account_risk_percent / 100.0;
    let stop_distance = stop_loss_distance(current_price, atr, risk);
    if stop_distance <= 0.0 || account_balance <= 0.0 {
        return PositionSizing {
            notional_size: 0.0,
            leverage: 1.0,
            margin: 0.0,
            risk_amount,
        };
    }

    let cap = account_balance * risk.max_position_size / 100.0;
    let notional_size = (risk_amount / stop_distance).min(cap);

    let required_margin = notional_size * BASE_MARGIN_RATE;
    let leverage = if required_margin > 0.0 {
        (notional_size / required_margin).min(risk.max_leverage).max(1.0)
    } else {
        1.0
    };

    PositionSizing {
        notional_size,
        leverage,
        margin: notional_size / leverage,
        risk_amount,
    }
}

/// Stop and take-profit ladder around `entry`. Percentages are distances from entry.
pub fn calculate_stop_loss_and_take_profit(
    direction: Direction,
    entry: f64,
    stop_loss_percent: f64,
    take_profit_percent: f64,
) -> (StopLoss, TakeProfit) {
    let sign = direction.sign();
    let stop_loss = StopLoss {
        price: entry * (1.0 - sign * stop_loss_percent / 100.0),
        percent: stop_loss_percent,
    };

    let targets = TAKE_PROFIT_LADDER
        .iter()
        .map(|multiple| {
            let percent = take_profit_percent * multiple;
            TakeProfitTarget {
                price: entry * (1.0 + sign * percent / 100.0),
                percent,
            }
        })
        .collect();

    let take_profit = TakeProfit {
        price: entry * (1.0 + sign * take_profit_percent / 100.0),
        percent: take_profit_percent,
        targets,
    };

    (stop_loss, take_profit)
}

/// Stop and target percentages once the ATR floor is applied. The target
/// widens with the stop so the configured reward-to-risk ratio holds.
pub fn effective_percents(current_price: f64, atr: f64, risk: &SizingConfig) -> (f64, f64) {
    if current_price <= 0.0 {
        return (risk.stop_loss_percent, risk.take_profit_percent);
    }
    let stop_percent = stop_loss_distance(current_price, atr, risk) / current_price * 100.0;
    let widening = stop_percent / risk.stop_loss_percent;
    (stop_percent, risk.take_profit_percent * widening)
}

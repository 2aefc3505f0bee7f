mod signing_flow;
mod support;

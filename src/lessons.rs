//! Built-in sample lessons.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SampleLesson {
    Welcome,
    Math,
    Science,
}

impl SampleLesson {
    pub fn text(self) -> &'static str {
        match self {
            Self::Welcome => "Hello Students! Welcome to our classroom.
I am your teaching robot.
I will help you learn new things.
Let's start our lesson today.
Please listen carefully.
Learning is fun!",
            Self::Math => "Today we learn Mathematics.
Two plus two equals four.
Five plus three equals eight.
Ten minus five equals five.
Math helps us solve problems.
Practice makes perfect!",
            Self::Science => "Welcome to Science class!
Science helps us understand the world.
The Sun gives us light and heat.
Plants need water to grow.
We breathe oxygen from the air.
Science is everywhere around us!",
        }
    }
}
